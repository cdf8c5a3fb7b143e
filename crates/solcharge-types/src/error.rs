//! Error types for parsing parameter identifiers and values.

use thiserror::Error;

/// Errors that can occur when interpreting parameter names and values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The name does not match any device parameter.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// The name does not match any parameter group.
    #[error("Unknown parameter group: {0}")]
    UnknownGroup(String),

    /// The value has the wrong type for the parameter.
    #[error("Parameter {parameter} expects a {expected} value")]
    InvalidValue {
        /// Wire name of the parameter.
        parameter: &'static str,
        /// Human-readable name of the expected kind.
        expected: &'static str,
    },
}

/// Result type alias using solcharge-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
