use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;
use votewatch_domain::reports::SubmissionPayload;
use votewatch_domain::scope::MonitoringScope;
use votewatch_domain::submissions::{Submission, SubmissionDraft, SubmissionType};
use votewatch_domain::util::format_ms_rfc3339;

use super::{actor_identity, request_meta};
use crate::middleware::{AuthContext, CorrelationId};
use crate::{
    error::{ApiError, map_domain_error},
    observability,
    state::AppState,
    validation,
};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct SubmissionRequest {
    /// The polling-unit-info record a linked report extends, or the
    /// identifier a new polling-unit-info record proposes.
    #[validate(length(min = 1, max = 128))]
    submission_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    client_submission_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    election_id: Option<String>,
    #[serde(default)]
    #[validate(
        length(max = 20),
        custom(function = "crate::validation::media_references")
    )]
    attachments: Vec<String>,
    data: Value,
}

#[derive(Serialize)]
struct SubmitResponse {
    submission_id: String,
    submission_type: &'static str,
    polling_unit_code: String,
    status: &'static str,
    duplicate: bool,
}

/// A stored record as the owning agent sees it.
#[derive(Serialize)]
pub(super) struct SubmissionView {
    submission_id: String,
    submission_type: &'static str,
    election_id: Option<String>,
    polling_unit_code: String,
    scope_snapshot: MonitoringScope,
    data: Value,
    attachments: Vec<String>,
    status: &'static str,
    client_submission_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SubmissionView {
    fn from_submission(submission: Submission) -> Result<Self, ApiError> {
        let data = submission.payload.to_document().map_err(map_domain_error)?;
        Ok(Self {
            submission_type: submission.submission_type().as_str(),
            submission_id: submission.submission_id,
            election_id: submission.election_id,
            polling_unit_code: submission.polling_unit_code,
            scope_snapshot: submission.scope_snapshot,
            data,
            attachments: submission.attachments,
            status: submission.status.as_str(),
            client_submission_id: submission.client_submission_id,
            created_at: format_ms_rfc3339(submission.created_at_ms),
            updated_at: format_ms_rfc3339(submission.updated_at_ms),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SubmissionListParams {
    submission_type: Option<String>,
    limit: Option<usize>,
}

pub(super) async fn submit_polling_unit_info(
    state: State<AppState>,
    auth: Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    payload: Json<SubmissionRequest>,
) -> Result<Response, ApiError> {
    submit(
        SubmissionType::PollingUnitInfo,
        state,
        auth,
        correlation,
        headers,
        payload,
    )
    .await
}

pub(super) async fn submit_officer_arrival(
    state: State<AppState>,
    auth: Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    payload: Json<SubmissionRequest>,
) -> Result<Response, ApiError> {
    submit(
        SubmissionType::OfficerArrival,
        state,
        auth,
        correlation,
        headers,
        payload,
    )
    .await
}

pub(super) async fn submit_result_tracking(
    state: State<AppState>,
    auth: Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    payload: Json<SubmissionRequest>,
) -> Result<Response, ApiError> {
    submit(
        SubmissionType::ResultTracking,
        state,
        auth,
        correlation,
        headers,
        payload,
    )
    .await
}

pub(super) async fn submit_incident_report(
    state: State<AppState>,
    auth: Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    payload: Json<SubmissionRequest>,
) -> Result<Response, ApiError> {
    submit(
        SubmissionType::IncidentReport,
        state,
        auth,
        correlation,
        headers,
        payload,
    )
    .await
}

async fn submit(
    submission_type: SubmissionType,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    Json(request): Json<SubmissionRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&request)?;
    let actor = actor_identity(&auth)?;
    let meta = request_meta(&headers, correlation.as_ref().map(|Extension(id)| id));

    let payload = SubmissionPayload::from_document(submission_type, request.data)
        .map_err(map_domain_error)?;
    let draft = SubmissionDraft {
        election_id: request.election_id,
        attachments: request.attachments,
        client_submission_id: request.client_submission_id,
        meta,
        ..SubmissionDraft::new(payload)
    }
    .with_submission_id(request.submission_id);

    let outcome = match state
        .submission_service()
        .submit(&actor.user_id, draft)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            observability::register_submission(submission_type, err.code());
            return Err(map_domain_error(err));
        }
    };

    let (status, outcome_label) = if outcome.duplicate {
        (StatusCode::OK, "duplicate")
    } else {
        (StatusCode::CREATED, "stored")
    };
    observability::register_submission(submission_type, outcome_label);
    tracing::info!(
        user_id = %actor.user_id,
        submission_type = submission_type.as_str(),
        submission_id = %outcome.submission.submission_id,
        duplicate = outcome.duplicate,
        "submission accepted"
    );

    let submission = outcome.submission;
    Ok((
        status,
        Json(SubmitResponse {
            submission_type: submission.submission_type().as_str(),
            submission_id: submission.submission_id,
            polling_unit_code: submission.polling_unit_code,
            status: submission.status.as_str(),
            duplicate: outcome.duplicate,
        }),
    )
        .into_response())
}

pub(super) async fn list_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<SubmissionListParams>,
) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let submission_type = params
        .submission_type
        .as_deref()
        .map(|raw| {
            SubmissionType::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("unknown submission_type '{raw}'")))
        })
        .transpose()?;
    let records = state
        .submission_service()
        .list(&actor.user_id, submission_type, params.limit)
        .await
        .map_err(map_domain_error)?;
    records
        .into_iter()
        .map(SubmissionView::from_submission)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

pub(super) async fn get_submission_family(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(submission_id): Path<String>,
) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let records = state
        .submission_service()
        .family(&actor.user_id, &submission_id)
        .await
        .map_err(map_domain_error)?;
    records
        .into_iter()
        .map(SubmissionView::from_submission)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}
