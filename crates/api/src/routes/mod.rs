mod credentials;
mod submissions;
mod sync;

use axum::extract::{Extension, State};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use votewatch_domain::identity::ActorIdentity;
use votewatch_domain::scope::MonitoringScope;
use votewatch_domain::submissions::RequestMeta;

use crate::middleware::{AuthContext, CorrelationId};
use crate::{
    error::{ApiError, map_domain_error},
    middleware as app_middleware, observability,
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/monitoring/scope", get(get_scope))
        .route(
            "/v1/monitoring/submissions",
            get(submissions::list_submissions),
        )
        .route(
            "/v1/monitoring/submissions/polling-unit-info",
            post(submissions::submit_polling_unit_info),
        )
        .route(
            "/v1/monitoring/submissions/officer-arrival",
            post(submissions::submit_officer_arrival),
        )
        .route(
            "/v1/monitoring/submissions/result-tracking",
            post(submissions::submit_result_tracking),
        )
        .route(
            "/v1/monitoring/submissions/incident-report",
            post(submissions::submit_incident_report),
        )
        .route(
            "/v1/monitoring/submissions/:submission_id",
            get(submissions::get_submission_family),
        )
        .route("/v1/monitoring/sync", post(sync::sync_submissions))
        .route(
            "/v1/monitoring/credentials",
            post(credentials::issue_credential),
        )
        .route(
            "/v1/monitoring/credentials/me",
            get(credentials::get_own_credential),
        )
        .route(
            "/v1/monitoring/credentials/verify",
            post(credentials::verify_credential),
        )
        .route(
            "/v1/admin/monitoring/credentials/backfill",
            post(credentials::backfill_credentials),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer(&state.config))
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer(&state.config));
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    backend: &'static str,
}

async fn health(State(state): State<AppState>) -> Response {
    let backend = state.db.name();
    let (status_code, status) = match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::error!(error = %err, backend, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            environment: state.config.app_env.clone(),
            backend,
        }),
    )
        .into_response()
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => ApiError::NotFound.into_response(),
    }
}

async fn get_scope(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MonitoringScope>, ApiError> {
    let actor = actor_identity(&auth)?;
    let scope = state
        .submission_service()
        .caller_scope(&actor.user_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(scope))
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    Ok(ActorIdentity::with_user_id(user_id.as_str()))
}

fn request_meta(headers: &HeaderMap, correlation: Option<&CorrelationId>) -> RequestMeta {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    RequestMeta {
        request_id: header_value(app_middleware::REQUEST_ID_HEADER),
        correlation_id: correlation
            .map(|correlation| correlation.0.clone())
            .or_else(|| header_value(app_middleware::CORRELATION_ID_HEADER)),
    }
}
