//! Error types for the configuration service.

use std::collections::BTreeMap;

use solcharge_core::Violation;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by [`crate::ConfigurationService`].
///
/// A partially applied configuration is not an error: it is reported as an
/// [`solcharge_core::ApplyOutcome`] inside a successful summary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The input violates one or more invariants. Nothing was stored or sent.
    #[error("Validation failed: {}", format_violations(.0))]
    ValidationFailed(Vec<Violation>),

    /// Some records of a bulk import are invalid. Nothing was stored.
    #[error("Import rejected: {} configuration(s) failed validation", .0.len())]
    ImportRejected(BTreeMap<String, Vec<Violation>>),

    /// No configuration with this name.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// An apply is already in flight.
    #[error("Busy: {0}")]
    Busy(String),

    /// The device could not be reached; nothing changed on it.
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// Unknown parameter or malformed value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Durable storage failed.
    #[error("Storage failure: {0}")]
    Storage(solcharge_store::Error),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<solcharge_store::Error> for ServiceError {
    fn from(err: solcharge_store::Error) -> Self {
        match err {
            solcharge_store::Error::NotFound(name) => ServiceError::NotFound(name),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<solcharge_types::ParseError> for ServiceError {
    fn from(err: solcharge_types::ParseError) -> Self {
        ServiceError::InvalidParameter(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(format!("background task failed: {}", err))
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
