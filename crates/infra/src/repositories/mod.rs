mod principals;
mod submissions;

pub use principals::*;
pub use submissions::*;

use votewatch_domain::error::DomainError;

/// Collapses a SurrealDB failure into the domain taxonomy: uniqueness
/// violations become `Conflict`, everything else is a storage failure.
pub(crate) fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    classify_surreal_message(&err.to_string())
}

pub(crate) fn classify_surreal_message(message: &str) -> DomainError {
    let error_message = message.to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Storage(format!("surreal query failed: {error_message}"))
}

pub(crate) fn invalid_result(err: surrealdb::Error) -> DomainError {
    DomainError::Storage(format!("invalid query result: {err}"))
}
