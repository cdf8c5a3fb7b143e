//! Error types for solcharge-store.

use std::path::PathBuf;

/// Result type for solcharge-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in solcharge-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create the storage directory.
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No configuration stored under this name.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// The name cannot be turned into a storage key.
    #[error("Invalid configuration name: {0}")]
    InvalidName(String),

    /// A stored key does not decode back to a name.
    #[error("Corrupt storage key: {0}")]
    CorruptKey(String),

    /// Unknown backend name in configuration.
    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a missing-record error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
