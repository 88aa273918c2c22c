pub mod auth;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod ports;
pub mod reports;
pub mod scope;
pub mod submissions;
pub mod sync;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
