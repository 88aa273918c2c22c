//! Bulk sync reconciler: replays an offline queue as one unit of work.
//!
//! Items are prepared in claimed-time order against the repository overlaid
//! with the rows already staged from this batch, then every staged row is
//! committed with a single `upsert_batch`. Item-level failures are reported
//! and skipped; a storage failure aborts the whole batch and nothing is
//! written.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::principals::PrincipalRepository;
use crate::ports::submissions::SubmissionRepository;
use crate::reports::SubmissionPayload;
use crate::submissions::{
    ClientIdMatch, Prepared, RequestMeta, Submission, SubmissionDraft, SubmissionLookup,
    SubmissionType, caller_scope, prepare,
};
use crate::util::parse_rfc3339_ms;

pub const MAX_SYNC_BATCH: usize = 100;

/// Claimed creation time: RFC 3339 text or epoch milliseconds, whole or
/// fractional.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ClaimedTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
}

impl ClaimedTimestamp {
    pub fn epoch_ms(&self) -> Option<i64> {
        match self {
            ClaimedTimestamp::Millis(ms) => Some(*ms),
            ClaimedTimestamp::FractionalMillis(ms) => ms.is_finite().then(|| ms.trunc() as i64),
            ClaimedTimestamp::Text(text) => parse_rfc3339_ms(text),
        }
    }
}

/// One queued item as the offline client replays it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    #[serde(alias = "submission_type")]
    pub submission_type: String,
    #[serde(default, alias = "client_submission_id")]
    pub client_submission_id: Option<String>,
    #[serde(default, alias = "submission_data")]
    pub submission_data: Value,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<ClaimedTimestamp>,
    #[serde(default, alias = "election_id")]
    pub election_id: Option<String>,
}

impl SyncEnvelope {
    pub fn claimed_at_ms(&self) -> Option<i64> {
        self.created_at.as_ref().and_then(ClaimedTimestamp::epoch_ms)
    }

    /// `submissionId` inside the data document: the record a linked report
    /// extends, or the identifier a new polling-unit-info record proposes.
    pub fn submission_id(&self) -> Option<String> {
        ["submissionId", "submission_id"]
            .into_iter()
            .find_map(|field| self.submission_data.get(field).and_then(Value::as_str))
            .map(str::to_string)
    }
}

/// One entry of the request, decoded on its own so that a malformed entry
/// fails alone instead of rejecting the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedItem {
    claimed_at_ms: Option<i64>,
    client_submission_id: Option<String>,
    submission_type: String,
    envelope: Result<SyncEnvelope, DomainError>,
}

impl QueuedItem {
    pub fn claimed_at_ms(&self) -> Option<i64> {
        self.claimed_at_ms
    }

    pub fn client_submission_id(&self) -> Option<&str> {
        self.client_submission_id.as_deref()
    }
}

impl From<SyncEnvelope> for QueuedItem {
    fn from(envelope: SyncEnvelope) -> Self {
        Self {
            claimed_at_ms: envelope.claimed_at_ms(),
            client_submission_id: envelope.client_submission_id.clone(),
            submission_type: envelope.submission_type.clone(),
            envelope: Ok(envelope),
        }
    }
}

impl From<Value> for QueuedItem {
    fn from(raw: Value) -> Self {
        let field = |names: [&str; 2]| names.into_iter().find_map(|name| raw.get(name)).cloned();
        let client_submission_id = field(["clientSubmissionId", "client_submission_id"])
            .and_then(|value| value.as_str().map(str::to_string));
        let claimed_at_ms = field(["createdAt", "created_at"])
            .and_then(|value| serde_json::from_value::<ClaimedTimestamp>(value).ok())
            .and_then(|claimed| claimed.epoch_ms());

        let (submission_type, envelope) = match field(["submissionType", "submission_type"]) {
            None | Some(Value::Null) => (
                String::new(),
                Err(DomainError::Validation("submissionType is required".into())),
            ),
            Some(Value::String(text)) => (
                text,
                serde_json::from_value::<SyncEnvelope>(raw).map_err(|err| {
                    DomainError::Validation(format!("malformed sync item: {err}"))
                }),
            ),
            Some(other) => {
                let rendered = other.to_string();
                (rendered.clone(), Err(DomainError::InvalidType(rendered)))
            }
        };

        Self {
            claimed_at_ms,
            client_submission_id,
            submission_type,
            envelope,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub total: usize,
    pub synced: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemResult {
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    pub client_submission_id: Option<String>,
    pub submission_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub summary: SyncSummary,
    /// In processed order, one entry per input item.
    pub results: Vec<SyncItemResult>,
}

enum Verdict {
    Duplicate(String),
    /// Duplicate of a row staged earlier in this batch; its identifier is
    /// read back from the commit.
    DuplicateOfStaged(usize),
    Staged(usize),
    Failed(DomainError),
}

struct Processed {
    client_submission_id: Option<String>,
    submission_type: String,
    verdict: Verdict,
}

/// Repository view that also sees rows staged earlier in the same batch.
struct StagedLookup<'a> {
    repo: &'a dyn SubmissionRepository,
    staged: &'a [Submission],
}

impl SubmissionLookup for StagedLookup<'_> {
    fn polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let submission_id = submission_id.to_string();
        Box::pin(async move {
            let staged = self.staged.iter().rev().find(|row| {
                row.submission_type() == SubmissionType::PollingUnitInfo
                    && row.submission_id == submission_id
            });
            match staged {
                Some(row) => Ok(Some(row.clone())),
                None => self.repo.find_polling_unit_info(&submission_id).await,
            }
        })
    }

    fn by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let user_id = user_id.to_string();
        let client_submission_id = client_submission_id.to_string();
        Box::pin(async move {
            let staged = self.staged.iter().find(|row| {
                row.user_id == user_id
                    && row.carries_client_id(&client_submission_id)
                    && submission_type.is_none_or(|wanted| row.submission_type() == wanted)
            });
            match staged {
                Some(row) => Ok(Some(row.clone())),
                None => {
                    self.repo
                        .find_by_client_id(&user_id, submission_type, &client_submission_id)
                        .await
                }
            }
        })
    }

    fn by_record_key(&self, record_key: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let record_key = record_key.to_string();
        Box::pin(async move {
            match self.staged.iter().find(|row| row.record_key == record_key) {
                Some(row) => Ok(Some(row.clone())),
                None => self.repo.get_by_record_key(&record_key).await,
            }
        })
    }
}

#[derive(Clone)]
pub struct SyncService {
    principals: Arc<dyn PrincipalRepository>,
    submissions: Arc<dyn SubmissionRepository>,
}

impl SyncService {
    pub fn new(
        principals: Arc<dyn PrincipalRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self {
            principals,
            submissions,
        }
    }

    pub async fn sync<I>(
        &self,
        user_id: &str,
        items: I,
        meta: RequestMeta,
    ) -> DomainResult<SyncReport>
    where
        I: IntoIterator,
        I::Item: Into<QueuedItem>,
    {
        let items = items.into_iter().map(Into::into).collect::<Vec<QueuedItem>>();
        if items.len() > MAX_SYNC_BATCH {
            return Err(DomainError::BatchTooLarge {
                size: items.len(),
                max: MAX_SYNC_BATCH,
            });
        }
        let scope = caller_scope(self.principals.as_ref(), user_id).await?;

        let mut staged: Vec<Submission> = Vec::new();
        let mut processed = Vec::with_capacity(items.len());
        for item in order_by_claimed_time(items) {
            let lookup = StagedLookup {
                repo: self.submissions.as_ref(),
                staged: &staged,
            };
            let outcome = match item
                .envelope
                .and_then(|envelope| draft_from_envelope(&envelope, &meta))
            {
                Ok(draft) => prepare(&lookup, user_id, &scope, draft, ClientIdMatch::AnyType).await,
                Err(err) => Err(err),
            };
            let verdict = match outcome {
                Ok(Prepared::Duplicate(existing)) => {
                    match staged.iter().position(|row| row.record_key == existing.record_key) {
                        Some(index) => Verdict::DuplicateOfStaged(index),
                        None => Verdict::Duplicate(existing.submission_id),
                    }
                }
                Ok(Prepared::Write(record)) => {
                    match staged.iter().position(|row| row.record_key == record.record_key) {
                        Some(index) => {
                            staged[index] = record;
                            Verdict::Staged(index)
                        }
                        None => {
                            staged.push(record);
                            Verdict::Staged(staged.len() - 1)
                        }
                    }
                }
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => Verdict::Failed(err),
            };
            processed.push(Processed {
                client_submission_id: item.client_submission_id,
                submission_type: item.submission_type,
                verdict,
            });
        }

        let committed = if staged.is_empty() {
            Vec::new()
        } else {
            self.submissions.upsert_batch(&staged).await?
        };
        if committed.len() != staged.len() {
            return Err(DomainError::Storage(format!(
                "batch commit returned {} rows for {} staged",
                committed.len(),
                staged.len()
            )));
        }

        Ok(build_report(processed, &committed))
    }
}

/// Stable sort on claimed time; items without a usable timestamp go last in
/// request order.
pub fn order_by_claimed_time(items: Vec<QueuedItem>) -> Vec<QueuedItem> {
    let mut items = items;
    items.sort_by_key(|item| {
        (
            item.claimed_at_ms.is_none(),
            item.claimed_at_ms.unwrap_or_default(),
        )
    });
    items
}

fn draft_from_envelope(envelope: &SyncEnvelope, meta: &RequestMeta) -> DomainResult<SubmissionDraft> {
    let submission_type = SubmissionType::parse(&envelope.submission_type)
        .ok_or_else(|| DomainError::InvalidType(envelope.submission_type.clone()))?;
    let payload = SubmissionPayload::from_document(submission_type, envelope.submission_data.clone())?;
    Ok(SubmissionDraft {
        election_id: envelope.election_id.clone(),
        attachments: envelope.attachments.clone(),
        client_submission_id: envelope.client_submission_id.clone(),
        meta: meta.clone(),
        ..SubmissionDraft::new(payload)
    }
    .with_submission_id(envelope.submission_id()))
}

fn build_report(processed: Vec<Processed>, committed: &[Submission]) -> SyncReport {
    let mut report = SyncReport {
        summary: SyncSummary {
            total: processed.len(),
            ..SyncSummary::default()
        },
        results: Vec::with_capacity(processed.len()),
    };
    let committed_id = |index: usize| committed.get(index).map(|row| row.submission_id.clone());

    for Processed {
        client_submission_id,
        submission_type,
        verdict,
    } in processed
    {
        let result = match verdict {
            Verdict::Duplicate(submission_id) => {
                report.summary.duplicates += 1;
                duplicate_result(client_submission_id, submission_type, Some(submission_id))
            }
            Verdict::DuplicateOfStaged(index) => {
                report.summary.duplicates += 1;
                duplicate_result(client_submission_id, submission_type, committed_id(index))
            }
            Verdict::Staged(index) => {
                report.summary.synced += 1;
                SyncItemResult {
                    success: true,
                    duplicate: false,
                    client_submission_id,
                    submission_type,
                    submission_id: committed_id(index),
                    error: None,
                    message: "synced".to_string(),
                }
            }
            Verdict::Failed(err) => {
                report.summary.failed += 1;
                SyncItemResult {
                    success: false,
                    duplicate: false,
                    client_submission_id,
                    submission_type,
                    submission_id: None,
                    error: Some(err.code()),
                    message: err.to_string(),
                }
            }
        };
        report.results.push(result);
    }
    report
}

fn duplicate_result(
    client_submission_id: Option<String>,
    submission_type: String,
    submission_id: Option<String>,
) -> SyncItemResult {
    SyncItemResult {
        success: true,
        duplicate: true,
        client_submission_id,
        submission_type,
        submission_id,
        error: None,
        message: "already synced".to_string(),
    }
}
