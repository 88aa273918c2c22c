use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::middleware::NoOpMiddleware;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_governor::GovernorLayer;
use tower_governor::governor::{GovernorConfig, GovernorConfigBuilder};
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use votewatch_domain::auth::Role;
use votewatch_infra::config::AppConfig;

use crate::error::ApiError;
use crate::observability;
use crate::state::AppState;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const SESSION_COOKIE: &str = "vw_session";
const MAX_CORRELATION_ID_LENGTH: usize = 128;

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// Who is calling. Anonymous unless a valid token named both a subject and
/// a known role.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub role: Role,
    pub is_authenticated: bool,
}

impl AuthContext {
    fn anonymous() -> Self {
        Self {
            user_id: None,
            role: Role::Anonymous,
            is_authenticated: false,
        }
    }

    fn agent(user_id: String, role: Role) -> Self {
        Self {
            user_id: Some(user_id),
            role,
            is_authenticated: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
}

/// Decodes the bearer token or session cookie. Every failure degrades to an
/// anonymous context; protected routes turn that into a 401.
fn resolve_auth(config: &AppConfig, headers: &HeaderMap) -> AuthContext {
    let Some(token) = auth_token(headers) else {
        return AuthContext::anonymous();
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let claims = match decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(err) => {
            tracing::warn!(error = %err, "rejected session token");
            return AuthContext::anonymous();
        }
    };

    if claims.sub.trim().is_empty() {
        tracing::warn!("session token has an empty subject");
        return AuthContext::anonymous();
    }
    match claims.role.as_deref().and_then(Role::parse) {
        Some(Role::Anonymous) | None => {
            tracing::warn!(user_id = %claims.sub, "session token carries no usable role");
            AuthContext::anonymous()
        }
        Some(role) => AuthContext::agent(claims.sub, role),
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let context = resolve_auth(&state.config, req.headers());
    req.extensions_mut().insert(context);
    next.run(req).await
}

pub async fn require_auth_middleware(req: Request<Body>, next: Next) -> Response {
    match req.extensions().get::<AuthContext>() {
        Some(context) if context.is_authenticated => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

fn correlation_id_from(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(value) = headers.get(CORRELATION_ID_HEADER) else {
        return Ok(Uuid::now_v7().to_string());
    };
    let value = value
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::Validation("invalid correlation id".into()))?;
    if value.is_empty() || value.len() > MAX_CORRELATION_ID_LENGTH {
        return Err(ApiError::Validation(format!(
            "correlation id must be 1-{MAX_CORRELATION_ID_LENGTH} characters"
        )));
    }
    Ok(value.to_string())
}

/// Threads a correlation id through the request and echoes it on the
/// response, minting one when the client sent none.
pub async fn correlation_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let correlation_id = match correlation_id_from(req.headers()) {
        Ok(correlation_id) => correlation_id,
        Err(err) => return err.into_response(),
    };
    let header_name = HeaderName::from_static(CORRELATION_ID_HEADER);
    let header_value = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = header_value.clone() {
        req.headers_mut().insert(header_name.clone(), value);
    }
    req.extensions_mut().insert(CorrelationId(correlation_id));

    let mut response = next.run(req).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(header_name, value);
    }
    response
}

pub async fn metrics_layer(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    observability::register_http_request(
        method.as_str(),
        &route,
        response.status(),
        started.elapsed(),
    );
    response
}

#[derive(Clone)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::now_v7().to_string())
            .ok()
            .map(RequestId::new)
    }
}

#[derive(Clone, Default)]
pub(crate) struct IntakeSpan;

impl<B> MakeSpan<B> for IntakeSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        info_span!(
            "intake_request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %header(REQUEST_ID_HEADER),
            correlation_id = %header(CORRELATION_ID_HEADER)
        )
    }
}

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, IntakeSpan> {
    TraceLayer::new_for_http().make_span_with(IntakeSpan)
}

pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::x_request_id(UuidRequestId)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

pub fn timeout_layer(config: &AppConfig) -> TimeoutLayer {
    TimeoutLayer::new(Duration::from_millis(config.request_timeout_ms.max(1)))
}

pub type RateLimitLayer = GovernorLayer<PeerIpKeyExtractor, NoOpMiddleware>;

/// Per-IP limiter. Field clients replay queues in bursts, so the burst size
/// is configured separately from the steady rate.
pub fn rate_limit_layer(config: &AppConfig) -> RateLimitLayer {
    let governor = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second.max(1))
        .burst_size(config.rate_limit_burst.max(1))
        .finish()
        .unwrap_or_else(|| {
            tracing::error!(
                per_second = config.rate_limit_per_second,
                burst = config.rate_limit_burst,
                "invalid rate limit settings; falling back to defaults"
            );
            GovernorConfig::default()
        });
    GovernorLayer {
        config: Arc::new(governor),
    }
}

pub(crate) fn auth_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty());
    bearer.or_else(|| session_cookie(headers))
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}
