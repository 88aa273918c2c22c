use thiserror::Error;

use crate::scope::{ScopeField, ScopeLevel};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("designation '{designation}' is not eligible for election monitoring")]
    IneligibleDesignation { designation: String },
    #[error(
        "missing scope data for {} level: {}",
        .level.as_str(),
        join_fields(.missing)
    )]
    MissingScopeData {
        level: ScopeLevel,
        missing: Vec<ScopeField>,
    },
    #[error("{message}")]
    IncompleteProfile {
        message: String,
        missing: Vec<ScopeField>,
    },
    #[error("could not generate a unique monitor key after {attempts} attempts")]
    KeyGenerationExhausted { attempts: u32 },
    #[error(
        "polling unit '{submitted}' is outside your assigned scope (assigned polling unit: {assigned})"
    )]
    ScopeMismatch { submitted: String, assigned: String },
    #[error("submission not found or not accessible")]
    NotFoundOrForbidden,
    #[error("invalid submission type '{0}'")]
    InvalidType(String),
    #[error("batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DomainError {
    /// Stable machine-readable code, shared by HTTP errors and per-item sync results.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::NotFound => "not_found",
            DomainError::Conflict => "conflict",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::IneligibleDesignation { .. } => "ineligible_designation",
            DomainError::MissingScopeData { .. } => "missing_scope_data",
            DomainError::IncompleteProfile { .. } => "incomplete_profile",
            DomainError::KeyGenerationExhausted { .. } => "key_generation_exhausted",
            DomainError::ScopeMismatch { .. } => "scope_mismatch",
            DomainError::NotFoundOrForbidden => "not_found_or_forbidden",
            DomainError::InvalidType(_) => "invalid_type",
            DomainError::BatchTooLarge { .. } => "batch_too_large",
            DomainError::Storage(_) => "processing_error",
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, DomainError::Storage(_))
    }

    pub fn missing_fields(&self) -> Option<&[ScopeField]> {
        match self {
            DomainError::MissingScopeData { missing, .. }
            | DomainError::IncompleteProfile { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

fn join_fields(fields: &[ScopeField]) -> String {
    fields
        .iter()
        .map(ScopeField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scope_data_names_every_field() {
        let err = DomainError::MissingScopeData {
            level: ScopeLevel::Ward,
            missing: vec![ScopeField::Lga, ScopeField::Ward],
        };
        assert_eq!(err.to_string(), "missing scope data for ward level: lga, ward");
        assert_eq!(err.code(), "missing_scope_data");
    }

    #[test]
    fn storage_errors_surface_as_processing_error() {
        let err = DomainError::Storage("connection reset".into());
        assert!(err.is_storage());
        assert_eq!(err.code(), "processing_error");
    }
}
