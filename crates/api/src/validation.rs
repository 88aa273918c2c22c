use crate::error::ApiError;
use validator::{Validate, ValidationError};

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(())
}

/// Each reference must be non-blank and at most 2048 characters.
pub fn media_references(references: &[String]) -> Result<(), ValidationError> {
    let valid = references.iter().all(|reference| {
        let reference = reference.trim();
        !reference.is_empty() && reference.chars().count() <= 2_048
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_reference"))
    }
}
