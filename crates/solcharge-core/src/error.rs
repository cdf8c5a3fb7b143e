//! Error types for solcharge-core.
//!
//! These errors describe what went wrong while talking to the charge
//! controller over its control channel. Validation problems are not errors
//! here: the validator returns a structured [`crate::ValidationResult`].
//!
//! # Recovery
//!
//! Nothing in this crate retries. A failed apply may have left some parameter
//! groups on the device, and deciding whether to re-send them needs operator
//! judgment about the device state.
//!
//! | Error Type | Device state | Notes |
//! |------------|--------------|-------|
//! | [`Error::Unreachable`] | Unchanged for the failing call | Channel could not reach the device |
//! | [`Error::Rejected`] | Unchanged for the failing call | Device answered with a refusal |
//! | [`Error::Timeout`] | Unknown for the failing call | Call abandoned |
//! | [`Error::PartialGroup`] | Listed parameters were set | Bridge sends parameters one at a time |
//! | [`Error::Cancelled`] | Unknown for the failing call | Apply deadline fired |

use std::time::Duration;

use thiserror::Error;

use solcharge_types::{ParameterId, ParseError};

/// Errors that can occur when communicating with the charge controller.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The control channel could not reach the device.
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// The device refused a parameter.
    #[error("Device rejected {parameter}: {reason}")]
    Rejected {
        /// Wire name of the refused parameter.
        parameter: String,
        /// Reason reported by the device.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Some parameters of a group were acknowledged before the group failed.
    #[error("Group failed after {} parameter(s) were set: {source}", .acknowledged.len())]
    PartialGroup {
        /// Parameters the device acknowledged before the failure.
        acknowledged: Vec<ParameterId>,
        /// What stopped the group.
        #[source]
        source: Box<Error>,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The device answered with something that could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// HTTP transport error from the device bridge.
    #[cfg(feature = "http-channel")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// Create a rejection error for a parameter.
    pub fn rejected(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error means the device was never reached.
    ///
    /// Used to tell "nothing happened" apart from "the device said no".
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Unreachable(_) | Error::Io(_) => true,
            #[cfg(feature = "http-channel")]
            Error::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Parameters that reached the device before this error, if any.
    pub fn acknowledged(&self) -> &[ParameterId] {
        match self {
            Error::PartialGroup { acknowledged, .. } => acknowledged,
            _ => &[],
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Result type alias using solcharge-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unreachable("connection refused");
        assert_eq!(err.to_string(), "Device unreachable: connection refused");

        let err = Error::rejected("bulkVoltage", "out of range");
        assert_eq!(err.to_string(), "Device rejected bulkVoltage: out of range");

        let err = Error::timeout("apply voltages", Duration::from_secs(10));
        assert!(err.to_string().contains("apply voltages"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_partial_group() {
        let err = Error::PartialGroup {
            acknowledged: vec![ParameterId::BulkVoltage],
            source: Box::new(Error::rejected("absorptionVoltage", "busy")),
        };
        assert_eq!(err.acknowledged(), &[ParameterId::BulkVoltage]);
        assert!(err.to_string().contains("1 parameter(s)"));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_is_unreachable() {
        assert!(Error::unreachable("no route").is_unreachable());
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(Error::from(io_err).is_unreachable());
        assert!(!Error::Cancelled.is_unreachable());
        assert!(Error::Cancelled.acknowledged().is_empty());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::UnknownParameter("x".to_string()).into();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
