//! Durable persistence boundary.
//!
//! A [`Backend`] stores opaque bytes under [`StorageKey`]s. Every write and
//! delete must be durable before the call returns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::StorageKey;

/// Which persistence medium backs a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded SQLite database.
    #[default]
    Sqlite,
    /// One JSON file per configuration.
    Files,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Files => "files",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "files" | "file" => Ok(BackendKind::Files),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

/// Durable key/value persistence.
pub trait Backend: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value.
    ///
    /// Returns only once the write survives a restart. A failed write leaves
    /// the previous value intact.
    fn write_durable(&self, key: &StorageKey, bytes: &[u8]) -> Result<()>;

    /// Read the value under `key`, or `None` if absent.
    fn read_durable(&self, key: &StorageKey) -> Result<Option<Vec<u8>>>;

    /// Every key currently stored.
    fn list_keys(&self) -> Result<Vec<StorageKey>>;

    /// Remove `key`. Returns `false` if it was absent.
    fn delete_durable(&self, key: &StorageKey) -> Result<bool>;

    /// Human-readable storage location.
    fn location(&self) -> String;

    /// Medium of this backend.
    fn kind(&self) -> BackendKind;
}
