use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use votewatch_domain::error::DomainError;
use votewatch_domain::scope::ScopeField;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    /// A domain failure the caller can act on; `missing` lists scope fields.
    #[error("{message}")]
    Domain {
        status: StatusCode,
        code: &'static str,
        message: String,
        missing: Option<Vec<&'static str>>,
    },
    #[error("processing error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Domain { status, .. } => *status,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::Conflict => "conflict",
            ApiError::Domain { code, .. } => *code,
            ApiError::Internal => "processing_error",
        }
    }

    fn details(&self) -> Option<ErrorDetails> {
        match self {
            ApiError::Domain {
                missing: Some(missing),
                ..
            } => Some(ErrorDetails {
                missing: missing.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

#[derive(Serialize)]
struct ErrorDetails {
    missing: Vec<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message,
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn missing_names(fields: &[ScopeField]) -> Vec<&'static str> {
    fields.iter().map(ScopeField::as_str).collect()
}

/// Maps a domain failure onto the HTTP envelope. Storage failures are logged
/// here with their detail and reach the client only as `processing error`.
pub fn map_domain_error(err: DomainError) -> ApiError {
    let status = match &err {
        DomainError::Validation(message) => return ApiError::Validation(message.clone()),
        DomainError::NotFound => return ApiError::NotFound,
        DomainError::Conflict => return ApiError::Conflict,
        DomainError::Forbidden(message) => return ApiError::Forbidden(message.clone()),
        DomainError::Storage(detail) => {
            tracing::error!(error = %detail, "storage failure");
            return ApiError::Internal;
        }
        DomainError::KeyGenerationExhausted { attempts } => {
            tracing::error!(attempts, "monitor key generation exhausted");
            StatusCode::SERVICE_UNAVAILABLE
        }
        DomainError::ScopeMismatch {
            submitted,
            assigned,
        } => {
            tracing::warn!(submitted, assigned, "submission outside assigned scope");
            StatusCode::FORBIDDEN
        }
        DomainError::IneligibleDesignation { .. } => StatusCode::FORBIDDEN,
        DomainError::MissingScopeData { .. } | DomainError::IncompleteProfile { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DomainError::NotFoundOrForbidden => StatusCode::NOT_FOUND,
        DomainError::InvalidType(_) => StatusCode::BAD_REQUEST,
        DomainError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    };
    ApiError::Domain {
        status,
        code: err.code(),
        message: err.to_string(),
        missing: err.missing_fields().map(missing_names),
    }
}
