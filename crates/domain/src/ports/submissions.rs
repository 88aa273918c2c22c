use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::submissions::{Submission, SubmissionType};

#[derive(Clone, Debug)]
pub struct SubmissionListQuery {
    pub user_id: String,
    pub submission_type: Option<SubmissionType>,
    pub limit: usize,
}

#[allow(clippy::needless_pass_by_value)]
pub trait SubmissionRepository: Send + Sync {
    fn get_by_record_key(&self, record_key: &str)
    -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    /// The polling-unit-info record carrying this submission identifier,
    /// regardless of owner.
    fn find_polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    /// `submission_type: None` matches a client id across all types.
    fn find_by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    /// Inserts or replaces the row keyed by `record_key` in one atomic step.
    /// An existing row keeps its `submission_id` and `created_at_ms`; the
    /// stored row is returned.
    fn upsert(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>>;

    /// Upserts every row or none of them.
    fn upsert_batch(
        &self,
        submissions: &[Submission],
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>>;

    fn list_by_user(
        &self,
        query: &SubmissionListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>>;

    /// Records owned by `user_id` sharing `submission_id`.
    fn list_family(
        &self,
        user_id: &str,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>>;
}
