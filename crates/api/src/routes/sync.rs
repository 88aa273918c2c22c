use axum::Json;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use votewatch_domain::sync::SyncReport;

use super::{actor_identity, request_meta};
use crate::middleware::{AuthContext, CorrelationId};
use crate::{
    error::{ApiError, map_domain_error},
    observability,
    state::AppState,
};

/// The offline queue, in whatever order the client transmits it. Items stay
/// raw here; each one is decoded separately.
#[derive(Debug, Deserialize)]
pub(super) struct SyncRequest {
    #[serde(alias = "items")]
    submissions: Vec<Value>,
}

pub(super) async fn sync_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    correlation: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncReport>, ApiError> {
    let actor = actor_identity(&auth)?;
    let meta = request_meta(&headers, correlation.as_ref().map(|Extension(id)| id));
    let batch_size = request.submissions.len();

    let report = state
        .sync_service()
        .sync(&actor.user_id, request.submissions, meta)
        .await
        .map_err(|err| {
            if err.is_storage() {
                tracing::error!(
                    user_id = %actor.user_id,
                    batch_size,
                    "bulk sync rolled back"
                );
            }
            map_domain_error(err)
        })?;

    observability::register_sync_batch(&report.summary);
    tracing::info!(
        user_id = %actor.user_id,
        total = report.summary.total,
        synced = report.summary.synced,
        duplicates = report.summary.duplicates,
        failed = report.summary.failed,
        "bulk sync applied"
    );
    Ok(Json(report))
}
