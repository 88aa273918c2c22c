use axum::extract::{Extension, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use validator::Validate;
use votewatch_domain::credentials::{
    BackfillOutcome, BackfillReport, DEFAULT_BACKFILL_LIMIT, MAX_BACKFILL_LIMIT, MonitorCredential,
};
use votewatch_domain::scope::MonitoringScope;
use votewatch_domain::util::format_ms_rfc3339;

use super::actor_identity;
use crate::middleware::AuthContext;
use crate::{
    error::{ApiError, map_domain_error},
    observability,
    state::AppState,
    validation,
};

#[derive(Debug, Default, Deserialize, Validate)]
pub(super) struct IssueCredentialRequest {
    /// Another user's id; admin only. Defaults to the caller.
    #[validate(length(min = 1, max = 128))]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct VerifyCredentialRequest {
    #[validate(length(min = 1, max = 32))]
    key: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(super) struct BackfillRequest {
    #[validate(range(min = 1, max = 500))]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub(super) struct CredentialView {
    key: String,
    status: &'static str,
    scope: MonitoringScope,
    assigned_by: Option<String>,
    assigned_at: String,
}

impl From<MonitorCredential> for CredentialView {
    fn from(credential: MonitorCredential) -> Self {
        Self {
            key: credential.key,
            status: credential.status.as_str(),
            scope: credential.scope,
            assigned_by: credential.assigned_by,
            assigned_at: format_ms_rfc3339(credential.assigned_at_ms),
        }
    }
}

#[derive(Serialize)]
struct IssueCredentialResponse {
    #[serde(flatten)]
    credential: CredentialView,
    already_assigned: bool,
}

#[derive(Serialize)]
pub(super) struct VerifyCredentialResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<MonitoringScope>,
}

pub(super) async fn issue_credential(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Option<Json<IssueCredentialRequest>>,
) -> Result<Response, ApiError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    validation::validate(&request)?;
    let actor = actor_identity(&auth)?;

    let (target_user_id, issued_by) = match request.user_id {
        Some(user_id) if user_id != actor.user_id => {
            if !auth.role.can_manage_credentials() {
                return Err(ApiError::Forbidden(
                    "only admins may issue credentials for other users".into(),
                ));
            }
            (user_id, Some(actor.user_id.clone()))
        }
        _ => (actor.user_id.clone(), None),
    };

    let issued = match state
        .credential_service()
        .issue(&target_user_id, issued_by)
        .await
    {
        Ok(issued) => issued,
        Err(err) => {
            observability::register_credential_issuance(err.code());
            return Err(map_domain_error(err));
        }
    };

    let (status, outcome) = if issued.already_assigned {
        (StatusCode::OK, "already_assigned")
    } else {
        (StatusCode::CREATED, "assigned")
    };
    observability::register_credential_issuance(outcome);
    tracing::info!(
        user_id = %target_user_id,
        actor_id = %actor.user_id,
        outcome,
        "monitor credential issuance"
    );

    Ok((
        status,
        Json(IssueCredentialResponse {
            credential: issued.credential.into(),
            already_assigned: issued.already_assigned,
        }),
    )
        .into_response())
}

pub(super) async fn get_own_credential(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<CredentialView>, ApiError> {
    let actor = actor_identity(&auth)?;
    let credential = state
        .credential_service()
        .get_for_user(&actor.user_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(credential.into()))
}

pub(super) async fn verify_credential(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<VerifyCredentialRequest>,
) -> Result<Json<VerifyCredentialResponse>, ApiError> {
    validation::validate(&request)?;
    let actor = actor_identity(&auth)?;
    let matched = state
        .credential_service()
        .verify(&actor.user_id, &request.key)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(VerifyCredentialResponse {
        valid: matched.is_some(),
        scope: matched.map(|credential| credential.scope),
    }))
}

pub(super) async fn backfill_credentials(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Option<Json<BackfillRequest>>,
) -> Result<Json<BackfillReport>, ApiError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    validation::validate(&request)?;
    let actor = actor_identity(&auth)?;
    if !auth.role.can_manage_credentials() {
        return Err(ApiError::Forbidden(
            "credential backfill requires an admin role".into(),
        ));
    }

    let limit = request
        .limit
        .unwrap_or(DEFAULT_BACKFILL_LIMIT)
        .min(MAX_BACKFILL_LIMIT);
    let report = state
        .credential_service()
        .backfill(limit, Some(actor.user_id.clone()))
        .await
        .map_err(map_domain_error)?;

    for issue in report
        .issues
        .iter()
        .filter(|issue| issue.outcome == BackfillOutcome::Failed)
    {
        tracing::error!(
            user_id = %issue.user_id,
            code = issue.code,
            error = %issue.message,
            "credential backfill failed for user"
        );
        observability::register_credential_issuance(issue.code);
    }
    tracing::info!(
        actor_id = %actor.user_id,
        scanned = report.scanned,
        assigned = report.assigned,
        skipped = report.skipped,
        failed = report.failed,
        "credential backfill finished"
    );
    Ok(Json(report))
}
