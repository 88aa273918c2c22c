use crate::DomainResult;
use crate::credentials::MonitorCredential;
use crate::identity::Principal;
use crate::ports::BoxFuture;

#[derive(Clone, Debug, PartialEq)]
pub enum CredentialAssignment {
    Assigned(MonitorCredential),
    /// The user already holds an active credential; it is returned unchanged.
    AlreadyActive(MonitorCredential),
    /// Another user holds the key. Nothing was written.
    KeyTaken,
}

#[allow(clippy::needless_pass_by_value)]
pub trait PrincipalRepository: Send + Sync {
    fn get(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<Principal>>>;

    fn monitor_key_exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>>;

    /// Claims the credential's key and binds it to the user as one atomic
    /// step. A missing user fails with `NotFound`.
    fn assign_credential(
        &self,
        user_id: &str,
        credential: &MonitorCredential,
    ) -> BoxFuture<'_, DomainResult<CredentialAssignment>>;

    /// Users with a monitoring designation, a state on their profile and no
    /// active credential.
    fn list_credential_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Principal>>>;
}
