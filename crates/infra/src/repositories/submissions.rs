use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, to_value};
use surrealdb::{Surreal, engine::remote::ws::Client};
use tokio::sync::RwLock;
use votewatch_domain::DomainResult;
use votewatch_domain::error::DomainError;
use votewatch_domain::ports::BoxFuture;
use votewatch_domain::ports::submissions::{SubmissionListQuery, SubmissionRepository};
use votewatch_domain::reports::SubmissionPayload;
use votewatch_domain::scope::MonitoringScope;
use votewatch_domain::submissions::{
    Submission, SubmissionStatus, SubmissionType, merge_client_ids,
};
use votewatch_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};

use super::{invalid_result, map_surreal_error};

fn newest_first(left: &Submission, right: &Submission) -> std::cmp::Ordering {
    right
        .created_at_ms
        .cmp(&left.created_at_ms)
        .then_with(|| right.record_key.cmp(&left.record_key))
}

/// Polling-unit-info first, then linked records in creation order.
fn family_order(left: &Submission, right: &Submission) -> std::cmp::Ordering {
    let rank = |submission: &Submission| {
        SubmissionType::ALL
            .iter()
            .position(|submission_type| *submission_type == submission.submission_type())
            .unwrap_or(usize::MAX)
    };
    rank(left)
        .cmp(&rank(right))
        .then_with(|| left.created_at_ms.cmp(&right.created_at_ms))
        .then_with(|| left.record_key.cmp(&right.record_key))
}

#[derive(Default)]
pub struct InMemorySubmissionRepository {
    store: Arc<RwLock<HashMap<String, Submission>>>,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    fn apply(store: &mut HashMap<String, Submission>, submission: &Submission) -> Submission {
        let mut row = submission.clone();
        if let Some(existing) = store.get(&row.record_key) {
            row.submission_id = existing.submission_id.clone();
            row.created_at_ms = existing.created_at_ms;
            row.client_submission_ids =
                merge_client_ids(&existing.client_submission_ids, &row.client_submission_ids);
        }
        store.insert(row.record_key.clone(), row.clone());
        row
    }
}

impl SubmissionRepository for InMemorySubmissionRepository {
    fn get_by_record_key(
        &self,
        record_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let record_key = record_key.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&record_key).cloned()) })
    }

    fn find_polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let submission_id = submission_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .find(|row| {
                    row.submission_id == submission_id
                        && row.submission_type() == SubmissionType::PollingUnitInfo
                })
                .cloned())
        })
    }

    fn find_by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let user_id = user_id.to_string();
        let client_submission_id = client_submission_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|row| {
                    row.user_id == user_id
                        && row.carries_client_id(&client_submission_id)
                        && submission_type.is_none_or(|wanted| row.submission_type() == wanted)
                })
                .min_by_key(|row| row.created_at_ms)
                .cloned())
        })
    }

    fn upsert(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
        let submission = submission.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            Ok(Self::apply(&mut store, &submission))
        })
    }

    fn upsert_batch(
        &self,
        submissions: &[Submission],
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let submissions = submissions.to_vec();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            Ok(submissions
                .iter()
                .map(|submission| Self::apply(&mut store, submission))
                .collect())
        })
    }

    fn list_by_user(
        &self,
        query: &SubmissionListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let query = query.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let mut rows = store
                .values()
                .filter(|row| {
                    row.user_id == query.user_id
                        && query
                            .submission_type
                            .is_none_or(|wanted| row.submission_type() == wanted)
                })
                .cloned()
                .collect::<Vec<_>>();
            rows.sort_by(newest_first);
            rows.truncate(query.limit);
            Ok(rows)
        })
    }

    fn list_family(
        &self,
        user_id: &str,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let user_id = user_id.to_string();
        let submission_id = submission_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let mut rows = store
                .values()
                .filter(|row| row.user_id == user_id && row.submission_id == submission_id)
                .cloned()
                .collect::<Vec<_>>();
            rows.sort_by(family_order);
            Ok(rows)
        })
    }
}

const SUBMISSION_FIELDS: &str = "record_key, submission_id, user_id, election_id, \
    polling_unit_code, submission_type, data, scope_snapshot, attachments, status, \
    client_submission_id, client_submission_ids, request_id, correlation_id, \
    <string>created_at AS created_at, <string>updated_at AS updated_at";

/// Keeps `submission_id` and `created_at` of an existing row and accumulates
/// client tokens; everything else is last write wins.
const UPSERT_ROW: &str = "UPSERT type::record('monitor_submission', $row.record_key) SET \
    record_key = $row.record_key, \
    submission_id = submission_id ?? $row.submission_id, \
    user_id = $row.user_id, \
    election_id = $row.election_id, \
    polling_unit_code = $row.polling_unit_code, \
    submission_type = $row.submission_type, \
    data = $row.data, \
    scope_snapshot = $row.scope_snapshot, \
    attachments = $row.attachments, \
    status = $row.status, \
    client_submission_id = $row.client_submission_id, \
    client_submission_ids = array::union(client_submission_ids ?? [], $row.client_submission_ids), \
    request_id = $row.request_id, \
    correlation_id = $row.correlation_id, \
    created_at = created_at ?? <datetime>$row.created_at, \
    updated_at = <datetime>$row.updated_at";

#[derive(Clone)]
pub struct SurrealSubmissionRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealSubmissionRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn build_row(submission: &Submission) -> DomainResult<Value> {
        let row = SurrealSubmissionWriteRow {
            record_key: submission.record_key.clone(),
            submission_id: submission.submission_id.clone(),
            user_id: submission.user_id.clone(),
            election_id: submission.election_id.clone(),
            polling_unit_code: submission.polling_unit_code.clone(),
            submission_type: submission.submission_type().as_str().to_string(),
            data: submission.payload.to_document()?,
            scope_snapshot: to_value(&submission.scope_snapshot)
                .map_err(|err| DomainError::Validation(format!("invalid scope: {err}")))?,
            attachments: submission.attachments.clone(),
            status: submission.status.as_str().to_string(),
            client_submission_id: submission.client_submission_id.clone(),
            client_submission_ids: submission.client_submission_ids.clone(),
            request_id: submission.request_id.clone(),
            correlation_id: submission.correlation_id.clone(),
            created_at: format_ms_rfc3339(submission.created_at_ms),
            updated_at: format_ms_rfc3339(submission.updated_at_ms),
        };
        to_value(row).map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))
    }

    fn map_row(row: SurrealSubmissionRow) -> DomainResult<Submission> {
        let submission_type = SubmissionType::parse(&row.submission_type).ok_or_else(|| {
            DomainError::Storage(format!("invalid submission_type '{}'", row.submission_type))
        })?;
        let payload = SubmissionPayload::from_document(submission_type, row.data)
            .map_err(|err| DomainError::Storage(format!("invalid stored payload: {err}")))?;
        let scope_snapshot = serde_json::from_value::<MonitoringScope>(row.scope_snapshot)
            .map_err(|err| DomainError::Storage(format!("invalid scope_snapshot: {err}")))?;
        let status = match row.status.as_str() {
            "submitted" => SubmissionStatus::Submitted,
            other => {
                return Err(DomainError::Storage(format!("invalid status '{other}'")));
            }
        };
        Ok(Submission {
            record_key: row.record_key,
            submission_id: row.submission_id,
            user_id: row.user_id,
            election_id: row.election_id,
            polling_unit_code: row.polling_unit_code,
            scope_snapshot,
            payload,
            attachments: row.attachments,
            status,
            client_submission_id: row.client_submission_id,
            client_submission_ids: row.client_submission_ids,
            request_id: row.request_id,
            correlation_id: row.correlation_id,
            created_at_ms: parse_datetime_ms(&row.created_at)?,
            updated_at_ms: parse_datetime_ms(&row.updated_at)?,
        })
    }

    fn decode_rows(rows: Vec<Value>) -> DomainResult<Vec<Submission>> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<SurrealSubmissionRow>(row)
                    .map_err(|err| DomainError::Storage(format!("invalid submission row: {err}")))
                    .and_then(Self::map_row)
            })
            .collect()
    }

    async fn select(
        &self,
        filter: &str,
        binds: Vec<(&'static str, Value)>,
    ) -> DomainResult<Vec<Submission>> {
        let query = format!("SELECT {SUBMISSION_FIELDS} FROM monitor_submission {filter}");
        let mut pending = self.client.query(query);
        for bind in binds {
            pending = pending.bind(bind);
        }
        let mut response = pending.await.map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
        Self::decode_rows(rows)
    }

    async fn select_by_record_keys(&self, record_keys: Vec<String>) -> DomainResult<Vec<Submission>> {
        self.select(
            "WHERE record_key IN $record_keys",
            vec![("record_keys", Value::from(record_keys))],
        )
        .await
    }
}

fn parse_datetime_ms(value: &str) -> DomainResult<i64> {
    parse_rfc3339_ms(value)
        .ok_or_else(|| DomainError::Storage(format!("invalid submission datetime '{value}'")))
}

/// Surfaces per-statement failures; a failed transaction reports every
/// statement, so all messages are inspected.
fn ensure_committed(response: &mut surrealdb::Response) -> DomainResult<()> {
    let errors = response.take_errors();
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors
        .values()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(DomainError::Storage(format!("surreal write failed: {message}")))
}

#[derive(Debug, Serialize)]
struct SurrealSubmissionWriteRow {
    record_key: String,
    submission_id: String,
    user_id: String,
    election_id: Option<String>,
    polling_unit_code: String,
    submission_type: String,
    data: Value,
    scope_snapshot: Value,
    attachments: Vec<String>,
    status: String,
    client_submission_id: Option<String>,
    client_submission_ids: Vec<String>,
    request_id: Option<String>,
    correlation_id: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct SurrealSubmissionRow {
    record_key: String,
    submission_id: String,
    user_id: String,
    #[serde(default)]
    election_id: Option<String>,
    polling_unit_code: String,
    submission_type: String,
    data: Value,
    scope_snapshot: Value,
    #[serde(default)]
    attachments: Vec<String>,
    status: String,
    #[serde(default)]
    client_submission_id: Option<String>,
    #[serde(default)]
    client_submission_ids: Vec<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SubmissionRepository for SurrealSubmissionRepository {
    fn get_by_record_key(
        &self,
        record_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let record_key = record_key.to_string();
        Box::pin(async move {
            let mut rows = self
                .select(
                    "WHERE record_key = $record_key LIMIT 1",
                    vec![("record_key", Value::from(record_key))],
                )
                .await?;
            Ok(rows.pop())
        })
    }

    fn find_polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let submission_id = submission_id.to_string();
        Box::pin(async move {
            let mut rows = self
                .select(
                    "WHERE submission_id = $submission_id \
                       AND submission_type = 'polling_unit_info' LIMIT 1",
                    vec![("submission_id", Value::from(submission_id))],
                )
                .await?;
            Ok(rows.pop())
        })
    }

    fn find_by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        let mut binds = vec![
            ("user_id", Value::from(user_id)),
            ("client_submission_id", Value::from(client_submission_id)),
        ];
        let filter = match submission_type {
            Some(submission_type) => {
                binds.push(("submission_type", Value::from(submission_type.as_str())));
                "WHERE user_id = $user_id AND client_submission_ids CONTAINS $client_submission_id \
                   AND submission_type = $submission_type ORDER BY created_at ASC LIMIT 1"
            }
            None => {
                "WHERE user_id = $user_id AND client_submission_ids CONTAINS $client_submission_id \
                   ORDER BY created_at ASC LIMIT 1"
            }
        };
        Box::pin(async move {
            let mut rows = self.select(filter, binds).await?;
            Ok(rows.pop())
        })
    }

    fn upsert(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
        let row = Self::build_row(submission);
        let record_key = submission.record_key.clone();
        Box::pin(async move {
            let row = row?;
            let mut response = self
                .client
                .query(UPSERT_ROW)
                .bind(("row", row))
                .await
                .map_err(map_surreal_error)?;
            ensure_committed(&mut response)?;
            let mut rows = self.select_by_record_keys(vec![record_key]).await?;
            rows.pop()
                .ok_or_else(|| DomainError::Storage("upsert returned no row".to_string()))
        })
    }

    fn upsert_batch(
        &self,
        submissions: &[Submission],
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let rows = submissions
            .iter()
            .map(Self::build_row)
            .collect::<DomainResult<Vec<_>>>();
        let record_keys = submissions
            .iter()
            .map(|submission| submission.record_key.clone())
            .collect::<Vec<_>>();
        Box::pin(async move {
            let rows = rows?;
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            let query = format!(
                "BEGIN TRANSACTION; \
                 FOR $row IN $rows {{ {UPSERT_ROW}; }}; \
                 COMMIT TRANSACTION;"
            );
            let mut response = self
                .client
                .query(query)
                .bind(("rows", rows))
                .await
                .map_err(map_surreal_error)?;
            ensure_committed(&mut response)?;

            let mut stored = self
                .select_by_record_keys(record_keys.clone())
                .await?
                .into_iter()
                .map(|row| (row.record_key.clone(), row))
                .collect::<HashMap<_, _>>();
            record_keys
                .iter()
                .map(|record_key| {
                    stored.remove(record_key).ok_or_else(|| {
                        DomainError::Storage(format!("batch row '{record_key}' missing after commit"))
                    })
                })
                .collect()
        })
    }

    fn list_by_user(
        &self,
        query: &SubmissionListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let mut binds = vec![
            ("user_id", Value::from(query.user_id.clone())),
            ("limit", Value::from(query.limit as i64)),
        ];
        let filter = match query.submission_type {
            Some(submission_type) => {
                binds.push(("submission_type", Value::from(submission_type.as_str())));
                "WHERE user_id = $user_id AND submission_type = $submission_type \
                 ORDER BY created_at DESC LIMIT $limit"
            }
            None => "WHERE user_id = $user_id ORDER BY created_at DESC LIMIT $limit",
        };
        Box::pin(async move {
            let mut rows = self.select(filter, binds).await?;
            rows.sort_by(newest_first);
            Ok(rows)
        })
    }

    fn list_family(
        &self,
        user_id: &str,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let binds = vec![
            ("user_id", Value::from(user_id)),
            ("submission_id", Value::from(submission_id)),
        ];
        Box::pin(async move {
            let mut rows = self
                .select(
                    "WHERE user_id = $user_id AND submission_id = $submission_id",
                    binds,
                )
                .await?;
            rows.sort_by(family_order);
            Ok(rows)
        })
    }
}
