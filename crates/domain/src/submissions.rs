//! Submission store: validate-and-persist one report.
//!
//! Every write re-resolves the caller's scope from their live profile, finds
//! the polling unit the report refers to, checks it against that scope and
//! only then builds the stored record. Storage identity is a digest of the
//! type's identity tuple, so retries land on the same row.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::Principal;
use crate::ports::BoxFuture;
use crate::ports::principals::PrincipalRepository;
use crate::ports::submissions::{SubmissionListQuery, SubmissionRepository};
use crate::reports::{SubmissionPayload, validate_references};
use crate::scope::{MonitoringScope, RawLocation, ScopeComponent, normalize_code, resolve_scope};
use crate::util::{digest_key, now_ms, uuid_v7_without_dashes};

pub const MAX_CLIENT_SUBMISSION_ID_LENGTH: usize = 128;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    PollingUnitInfo,
    OfficerArrival,
    ResultTracking,
    IncidentReport,
}

impl SubmissionType {
    pub const ALL: [SubmissionType; 4] = [
        SubmissionType::PollingUnitInfo,
        SubmissionType::OfficerArrival,
        SubmissionType::ResultTracking,
        SubmissionType::IncidentReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionType::PollingUnitInfo => "polling_unit_info",
            SubmissionType::OfficerArrival => "officer_arrival",
            SubmissionType::ResultTracking => "result_tracking",
            SubmissionType::IncidentReport => "incident_report",
        }
    }

    /// Accepts the stored name or its hyphenated route form.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|submission_type| submission_type.as_str() == wanted)
    }

    /// Types that extend a polling-unit-info record and cannot stand alone.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            SubmissionType::OfficerArrival | SubmissionType::ResultTracking
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
        }
    }
}

/// A stored report. `record_key` is the storage identity; `submission_id`
/// is the identifier shared by a polling-unit-info record and its linked
/// reports.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Submission {
    pub record_key: String,
    pub submission_id: String,
    pub user_id: String,
    pub election_id: Option<String>,
    pub polling_unit_code: String,
    pub scope_snapshot: MonitoringScope,
    #[serde(flatten)]
    pub payload: SubmissionPayload,
    pub attachments: Vec<String>,
    pub status: SubmissionStatus,
    /// Token of the latest write.
    pub client_submission_id: Option<String>,
    /// Every token ever applied to this row; replays of any of them are
    /// duplicates.
    pub client_submission_ids: Vec<String>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Submission {
    pub fn submission_type(&self) -> SubmissionType {
        self.payload.submission_type()
    }

    pub fn carries_client_id(&self, client_submission_id: &str) -> bool {
        self.client_submission_ids
            .iter()
            .any(|token| token == client_submission_id)
    }
}

/// Union of two token lists, keeping first-seen order.
pub fn merge_client_ids(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for token in incoming {
        if !merged.contains(token) {
            merged.push(token.clone());
        }
    }
    merged
}

/// The tuple a record is upserted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionIdentity {
    PollingUnit {
        user_id: String,
        polling_unit_code: String,
    },
    Linked {
        user_id: String,
        submission_type: SubmissionType,
        submission_id: String,
    },
    ClientToken {
        user_id: String,
        submission_type: SubmissionType,
        client_submission_id: String,
    },
    /// Always a new row.
    Unique(String),
}

impl SubmissionIdentity {
    pub fn record_key(&self) -> String {
        match self {
            SubmissionIdentity::PollingUnit {
                user_id,
                polling_unit_code,
            } => digest_key(&[
                SubmissionType::PollingUnitInfo.as_str(),
                user_id,
                polling_unit_code,
            ]),
            SubmissionIdentity::Linked {
                user_id,
                submission_type,
                submission_id,
            } => digest_key(&["linked", submission_type.as_str(), user_id, submission_id]),
            SubmissionIdentity::ClientToken {
                user_id,
                submission_type,
                client_submission_id,
            } => digest_key(&[
                "client",
                submission_type.as_str(),
                user_id,
                client_submission_id,
            ]),
            SubmissionIdentity::Unique(nonce) => digest_key(&["unique", nonce]),
        }
    }
}

/// Transport metadata stored alongside each record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// One report as a caller sends it, already decoded into its typed payload.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionDraft {
    pub payload: SubmissionPayload,
    /// The polling-unit-info record this report extends.
    pub linked_submission_id: Option<String>,
    /// Identifier an offline client chose for a new polling-unit-info
    /// record, so that reports queued with it can link before it syncs.
    pub proposed_submission_id: Option<String>,
    pub election_id: Option<String>,
    pub attachments: Vec<String>,
    pub client_submission_id: Option<String>,
    pub meta: RequestMeta,
}

impl SubmissionDraft {
    pub fn new(payload: SubmissionPayload) -> Self {
        Self {
            payload,
            linked_submission_id: None,
            proposed_submission_id: None,
            election_id: None,
            attachments: Vec::new(),
            client_submission_id: None,
            meta: RequestMeta::default(),
        }
    }

    /// A polling-unit-info record proposes its own identifier with
    /// `submission_id`; every other type links to one.
    pub fn with_submission_id(mut self, submission_id: Option<String>) -> Self {
        if self.payload.submission_type() == SubmissionType::PollingUnitInfo {
            self.proposed_submission_id = submission_id;
        } else {
            self.linked_submission_id = submission_id;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitOutcome {
    pub submission: Submission,
    /// The client token matched an existing record; nothing was written.
    pub duplicate: bool,
}

/// How a client token is matched against existing records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIdMatch {
    SameType,
    AnyType,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Prepared {
    Duplicate(Submission),
    Write(Submission),
}

/// Read side used while preparing a write. The bulk path layers its staged,
/// not yet committed rows over the repository.
pub(crate) trait SubmissionLookup: Send + Sync {
    fn polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    fn by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>>;

    fn by_record_key(&self, record_key: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>>;
}

pub(crate) struct LiveLookup<'a>(pub &'a dyn SubmissionRepository);

impl SubmissionLookup for LiveLookup<'_> {
    fn polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.0.find_polling_unit_info(submission_id)
    }

    fn by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.0
            .find_by_client_id(user_id, submission_type, client_submission_id)
    }

    fn by_record_key(&self, record_key: &str) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.0.get_by_record_key(record_key)
    }
}

#[derive(Clone)]
pub struct SubmissionService {
    principals: Arc<dyn PrincipalRepository>,
    submissions: Arc<dyn SubmissionRepository>,
}

impl SubmissionService {
    pub fn new(
        principals: Arc<dyn PrincipalRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self {
            principals,
            submissions,
        }
    }

    /// The caller's scope, derived from the live profile on every call.
    pub async fn caller_scope(&self, user_id: &str) -> DomainResult<MonitoringScope> {
        caller_scope(self.principals.as_ref(), user_id).await
    }

    pub async fn submit(&self, user_id: &str, draft: SubmissionDraft) -> DomainResult<SubmitOutcome> {
        let scope = self.caller_scope(user_id).await?;
        let lookup = LiveLookup(self.submissions.as_ref());
        match prepare(&lookup, user_id, &scope, draft, ClientIdMatch::SameType).await? {
            Prepared::Duplicate(existing) => Ok(SubmitOutcome {
                submission: existing,
                duplicate: true,
            }),
            Prepared::Write(record) => {
                let stored = self.submissions.upsert(&record).await?;
                Ok(SubmitOutcome {
                    submission: stored,
                    duplicate: false,
                })
            }
        }
    }

    /// The caller's records, newest first.
    pub async fn list(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        limit: Option<usize>,
    ) -> DomainResult<Vec<Submission>> {
        let query = SubmissionListQuery {
            user_id: user_id.to_string(),
            submission_type,
            limit: limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
        };
        self.submissions.list_by_user(&query).await
    }

    /// Every record the caller owns under `submission_id`.
    pub async fn family(&self, user_id: &str, submission_id: &str) -> DomainResult<Vec<Submission>> {
        let records = self
            .submissions
            .list_family(user_id, submission_id.trim())
            .await?;
        if records.is_empty() {
            return Err(DomainError::NotFoundOrForbidden);
        }
        Ok(records)
    }
}

pub(crate) async fn caller_scope(
    principals: &dyn PrincipalRepository,
    user_id: &str,
) -> DomainResult<MonitoringScope> {
    let principal = principals
        .get(user_id)
        .await?
        .unwrap_or_else(|| Principal::new(user_id));
    resolve_scope(principal.designation.as_deref(), &principal.location)
}

/// Runs every check a write needs and builds the record to upsert. Nothing
/// is written here.
pub(crate) async fn prepare(
    lookup: &dyn SubmissionLookup,
    user_id: &str,
    scope: &MonitoringScope,
    draft: SubmissionDraft,
    client_match: ClientIdMatch,
) -> DomainResult<Prepared> {
    let submission_type = draft.payload.submission_type();
    draft.payload.validate()?;
    validate_references("attachments", &draft.attachments)?;
    let client_submission_id = clean_client_id(draft.client_submission_id.as_deref())?;
    let linked_submission_id = match submission_type {
        SubmissionType::PollingUnitInfo => None,
        _ => clean_identifier("submission_id", draft.linked_submission_id.as_deref())?,
    };
    let proposed_submission_id = match submission_type {
        SubmissionType::PollingUnitInfo => {
            clean_identifier("submission_id", draft.proposed_submission_id.as_deref())?
        }
        _ => None,
    };

    if let Some(client_id) = client_submission_id.as_deref() {
        let type_filter = match client_match {
            ClientIdMatch::SameType => Some(submission_type),
            ClientIdMatch::AnyType => None,
        };
        if let Some(existing) = lookup.by_client_id(user_id, type_filter, client_id).await? {
            return Ok(Prepared::Duplicate(existing));
        }
    }

    let parent = match linked_submission_id.as_deref() {
        Some(linked) => Some(owned_polling_unit_info(lookup, user_id, linked).await?),
        None if submission_type.is_linked() => {
            return Err(DomainError::Validation(format!(
                "{} requires the submission_id of a polling_unit_info record",
                submission_type.as_str()
            )));
        }
        None => None,
    };

    let referenced = referenced_polling_unit(&draft.payload, parent.as_ref(), scope)?;
    if !scope.covers_polling_unit(&referenced.code) {
        return Err(DomainError::ScopeMismatch {
            submitted: referenced.label,
            assigned: scope
                .polling_unit
                .as_ref()
                .map(|pu| pu.code.clone())
                .unwrap_or_else(|| "unassigned".to_string()),
        });
    }

    let empty = RawLocation::default();
    let scope_snapshot = scope.overlay(draft.payload.location().unwrap_or(&empty));

    let (identity, candidate_id) = match (submission_type, &parent) {
        (SubmissionType::PollingUnitInfo, _) => (
            SubmissionIdentity::PollingUnit {
                user_id: user_id.to_string(),
                polling_unit_code: referenced.code.clone(),
            },
            proposed_submission_id
                .clone()
                .unwrap_or_else(|| format!("PUI-{}", uuid_v7_without_dashes())),
        ),
        (SubmissionType::OfficerArrival | SubmissionType::ResultTracking, Some(parent)) => (
            SubmissionIdentity::Linked {
                user_id: user_id.to_string(),
                submission_type,
                submission_id: parent.submission_id.clone(),
            },
            parent.submission_id.clone(),
        ),
        (SubmissionType::OfficerArrival | SubmissionType::ResultTracking, None) => {
            return Err(DomainError::Validation(format!(
                "{} requires a linked polling_unit_info record",
                submission_type.as_str()
            )));
        }
        (SubmissionType::IncidentReport, parent) => {
            let identity = match client_submission_id.as_deref() {
                Some(client_id) => SubmissionIdentity::ClientToken {
                    user_id: user_id.to_string(),
                    submission_type,
                    client_submission_id: client_id.to_string(),
                },
                None => SubmissionIdentity::Unique(uuid_v7_without_dashes()),
            };
            let candidate = parent
                .as_ref()
                .map(|parent| parent.submission_id.clone())
                .unwrap_or_else(|| format!("INC-{}", uuid_v7_without_dashes()));
            (identity, candidate)
        }
    };

    let record_key = identity.record_key();
    let now = now_ms();
    let incoming_tokens = client_submission_id.iter().cloned().collect::<Vec<_>>();
    let (submission_id, created_at_ms, client_submission_ids) =
        match lookup.by_record_key(&record_key).await? {
            Some(existing) => (
                existing.submission_id,
                existing.created_at_ms,
                merge_client_ids(&existing.client_submission_ids, &incoming_tokens),
            ),
            None => {
                if let Some(proposed) = proposed_submission_id.as_deref() {
                    ensure_identifier_free(lookup, proposed, &record_key).await?;
                }
                (candidate_id, now, incoming_tokens)
            }
        };

    Ok(Prepared::Write(Submission {
        record_key,
        submission_id,
        user_id: user_id.to_string(),
        election_id: draft
            .election_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        polling_unit_code: referenced.code,
        scope_snapshot,
        payload: draft.payload,
        attachments: draft
            .attachments
            .into_iter()
            .map(|reference| reference.trim().to_string())
            .collect(),
        status: SubmissionStatus::Submitted,
        client_submission_id,
        client_submission_ids,
        request_id: draft.meta.request_id,
        correlation_id: draft.meta.correlation_id,
        created_at_ms,
        updated_at_ms: now,
    }))
}

/// A missing row and a row owned by someone else are indistinguishable to
/// the caller. The reference may also be the client token the record was
/// queued with.
async fn owned_polling_unit_info(
    lookup: &dyn SubmissionLookup,
    user_id: &str,
    submission_id: &str,
) -> DomainResult<Submission> {
    match lookup.polling_unit_info(submission_id).await? {
        Some(parent) if parent.user_id == user_id => return Ok(parent),
        _ => {}
    }
    lookup
        .by_client_id(user_id, Some(SubmissionType::PollingUnitInfo), submission_id)
        .await?
        .ok_or(DomainError::NotFoundOrForbidden)
}

/// A proposed identifier must not already name a different
/// polling-unit-info record.
async fn ensure_identifier_free(
    lookup: &dyn SubmissionLookup,
    submission_id: &str,
    record_key: &str,
) -> DomainResult<()> {
    match lookup.polling_unit_info(submission_id).await? {
        Some(existing) if existing.record_key != record_key => Err(DomainError::Conflict),
        _ => Ok(()),
    }
}

fn referenced_polling_unit(
    payload: &SubmissionPayload,
    parent: Option<&Submission>,
    scope: &MonitoringScope,
) -> DomainResult<ScopeComponent> {
    if let Some(parent) = parent {
        return Ok(ScopeComponent {
            code: normalize_code(&parent.polling_unit_code),
            label: parent.polling_unit_code.clone(),
        });
    }
    match payload {
        SubmissionPayload::PollingUnitInfo(info) => info.polling_unit().ok_or_else(|| {
            DomainError::Validation("location.polling_unit_code is required".into())
        }),
        SubmissionPayload::IncidentReport(report) => report
            .location
            .as_ref()
            .and_then(|location| {
                ScopeComponent::polling_unit(
                    location.polling_unit_code.as_deref(),
                    location.polling_unit.as_deref(),
                )
            })
            .or_else(|| scope.polling_unit.clone())
            .ok_or_else(|| {
                DomainError::Validation("location.polling_unit_code is required".into())
            }),
        SubmissionPayload::OfficerArrival(_) | SubmissionPayload::ResultTracking(_) => Err(
            DomainError::Validation("linked reports require a polling_unit_info record".into()),
        ),
    }
}

fn clean_client_id(raw: Option<&str>) -> DomainResult<Option<String>> {
    clean_identifier("client_submission_id", raw)
}

fn clean_identifier(field: &str, raw: Option<&str>) -> DomainResult<Option<String>> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_CLIENT_SUBMISSION_ID_LENGTH {
        return Err(DomainError::Validation(format!(
            "{field} exceeds max length of {MAX_CLIENT_SUBMISSION_ID_LENGTH}"
        )));
    }
    Ok(Some(value.to_string()))
}
