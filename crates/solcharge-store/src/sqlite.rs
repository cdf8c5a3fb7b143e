//! SQLite backend.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::info;

use crate::backend::{Backend, BackendKind};
use crate::error::{Error, Result};
use crate::key::StorageKey;
use crate::schema;

/// Stores each configuration as a row in an SQLite database.
///
/// The database runs in WAL mode with `synchronous = FULL`, so a committed
/// write is on disk before the call returns.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening configuration database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves no partial state behind in SQLite.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for SqliteBackend {
    fn write_durable(&self, key: &StorageKey, bytes: &[u8]) -> Result<()> {
        self.conn().execute(
            "INSERT INTO configurations (key, payload, written_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                written_at = excluded.written_at",
            rusqlite::params![
                key.as_str(),
                bytes,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;
        Ok(())
    }

    fn read_durable(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        let payload = self
            .conn()
            .query_row(
                "SELECT payload FROM configurations WHERE key = ?",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn list_keys(&self) -> Result<Vec<StorageKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM configurations ORDER BY key")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.iter().map(|k| StorageKey::from_raw(k)).collect()
    }

    fn delete_durable(&self, key: &StorageKey) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM configurations WHERE key = ?", [key.as_str()])?;
        Ok(deleted > 0)
    }

    fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> StorageKey {
        StorageKey::from_name(name).unwrap()
    }

    #[test]
    fn test_write_read_delete() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let k = key("Gel 150Ah");

        assert_eq!(backend.read_durable(&k).unwrap(), None);
        backend.write_durable(&k, b"one").unwrap();
        backend.write_durable(&k, b"two").unwrap();
        assert_eq!(backend.read_durable(&k).unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(backend.list_keys().unwrap(), vec![k.clone()]);

        assert!(backend.delete_durable(&k).unwrap());
        assert!(!backend.delete_durable(&k).unwrap());
        assert!(backend.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_location() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(backend.location(), ":memory:");
        assert_eq!(backend.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("configurations.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.write_durable(&key("Casa"), b"payload").unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(
            backend.read_durable(&key("Casa")).unwrap().as_deref(),
            Some(&b"payload"[..])
        );
        assert!(backend.location().ends_with("configurations.db"));
    }
}
