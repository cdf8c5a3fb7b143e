//! Main store implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use solcharge_types::ChargerSettings;

use crate::backend::{Backend, BackendKind};
use crate::error::{Error, Result};
use crate::file::FileBackend;
use crate::key::StorageKey;
use crate::models::{ConfigurationSummary, StoreInfo, StoredConfiguration};
use crate::sqlite::SqliteBackend;

/// Named configuration store.
///
/// Operations on the same name are linearizable: each one holds that name's
/// lock for its whole read-modify-write. Different names only contend inside
/// the backend. Every mutating call returns after the backend reports the
/// write durable.
///
/// All methods block; async callers should use `spawn_blocking`.
pub struct ConfigStore {
    backend: Box<dyn Backend>,
    locks: Mutex<HashMap<StorageKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("backend", &self.backend.kind())
            .field("location", &self.backend.location())
            .finish()
    }
}

impl ConfigStore {
    /// Create a store over any backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open an SQLite-backed store at the given path.
    pub fn open_sqlite<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Box::new(SqliteBackend::open(path)?)))
    }

    /// Open a directory-of-files store.
    pub fn open_files<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self::new(Box::new(FileBackend::open(dir)?)))
    }

    /// Open a store of the given kind at `path`.
    pub fn open<P: AsRef<Path>>(kind: BackendKind, path: P) -> Result<Self> {
        match kind {
            BackendKind::Sqlite => Self::open_sqlite(path),
            BackendKind::Files => Self::open_files(path),
        }
    }

    /// Open the default SQLite database location.
    pub fn open_default() -> Result<Self> {
        Self::open_sqlite(crate::default_db_path())
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Box::new(SqliteBackend::open_in_memory()?)))
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The table entry is dropped afterwards unless another caller holds or
    /// waits on it, so the table only ever contains names in use.
    fn with_key<T>(&self, key: &StorageKey, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one held here.
        if Arc::strong_count(&lock) == 2 {
            table.remove(key);
        }
        // Released under the table lock so the next check sees an exact count.
        drop(lock);
        drop(table);
        result
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn read_record(&self, key: &StorageKey) -> Result<Option<StoredConfiguration>> {
        match self.backend.read_durable(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Create or overwrite the configuration `name`.
    ///
    /// `createdAt` is kept from an existing record; `updatedAt` is always
    /// refreshed. Callers validate `settings` first.
    pub fn put(&self, name: &str, settings: &ChargerSettings) -> Result<StoredConfiguration> {
        let key = StorageKey::from_name(name)?;
        self.with_key(&key, || self.put_locked(&key, name, settings))
    }

    fn put_locked(
        &self,
        key: &StorageKey,
        name: &str,
        settings: &ChargerSettings,
    ) -> Result<StoredConfiguration> {
        let now = OffsetDateTime::now_utc();
        let created_at = match self.read_record(key) {
            Ok(existing) => existing.map(|r| r.created_at).unwrap_or(now),
            Err(Error::Serialization(e)) => {
                warn!("Overwriting unreadable record '{}': {}", name, e);
                now
            }
            Err(e) => return Err(e),
        };

        let record = StoredConfiguration {
            name: name.to_string(),
            settings: settings.clone(),
            created_at,
            updated_at: now,
        };
        self.backend
            .write_durable(key, &serde_json::to_vec(&record)?)?;

        if record.is_new() {
            info!("Created configuration '{}'", name);
        } else {
            info!("Updated configuration '{}'", name);
        }
        Ok(record)
    }

    /// Get the configuration `name`.
    pub fn get(&self, name: &str) -> Result<StoredConfiguration> {
        let key = StorageKey::from_name(name)?;
        self.with_key(&key, || self.read_record(&key))?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Every stored configuration, by name.
    ///
    /// Records that disappear or fail to decode while reading are skipped.
    pub fn records(&self) -> Result<BTreeMap<String, StoredConfiguration>> {
        let mut out = BTreeMap::new();
        for key in self.backend.list_keys()? {
            match self.with_key(&key, || self.read_record(&key)) {
                Ok(Some(record)) => {
                    out.insert(record.name.clone(), record);
                }
                Ok(None) => {}
                Err(Error::Serialization(e)) => warn!("Skipping unreadable record {}: {}", key, e),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Summaries of every stored configuration, by name.
    pub fn list(&self) -> Result<BTreeMap<String, ConfigurationSummary>> {
        let out: BTreeMap<_, _> = self
            .records()?
            .iter()
            .map(|(name, record)| (name.clone(), ConfigurationSummary::from(record)))
            .collect();
        debug!("Listed {} configurations", out.len());
        Ok(out)
    }

    /// Delete the configuration `name`.
    pub fn delete(&self, name: &str) -> Result<()> {
        let key = StorageKey::from_name(name)?;
        let deleted = self.with_key(&key, || self.backend.delete_durable(&key))?;

        if deleted {
            info!("Deleted configuration '{}'", name);
            Ok(())
        } else {
            Err(Error::NotFound(name.to_string()))
        }
    }

    /// Whether a configuration named `name` exists.
    pub fn contains(&self, name: &str) -> Result<bool> {
        let key = StorageKey::from_name(name)?;
        Ok(self.backend.read_durable(&key)?.is_some())
    }

    /// Store metadata.
    pub fn info(&self) -> Result<StoreInfo> {
        Ok(StoreInfo {
            count: self.backend.list_keys()?.len(),
            backend: self.backend.kind(),
            location: self.backend.location(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn lithium_100ah() -> ChargerSettings {
        ChargerSettings {
            battery_capacity: 100.0,
            is_lithium: true,
            threshold_percentage: 5.0,
            max_allowed_current: 10000.0,
            bulk_voltage: 14.4,
            absorption_voltage: 14.4,
            float_voltage: 13.6,
            use_fuente_dc: false,
            fuente_dc_amps: 0.0,
            factor_divider: 1,
        }
    }

    fn stores() -> Vec<(ConfigStore, Option<tempfile::TempDir>)> {
        let dir = tempfile::tempdir().unwrap();
        let files = ConfigStore::open_files(dir.path()).unwrap();
        vec![
            (ConfigStore::open_in_memory().unwrap(), None),
            (files, Some(dir)),
        ]
    }

    #[test]
    fn test_put_then_get() {
        for (store, _dir) in stores() {
            let saved = store.put("Batería Litio 100Ah Casa", &lithium_100ah()).unwrap();
            assert!(saved.is_new());

            let loaded = store.get("Batería Litio 100Ah Casa").unwrap();
            assert_eq!(loaded.settings, lithium_100ah());
            assert_eq!(loaded.name, "Batería Litio 100Ah Casa");
            assert_eq!(loaded.created_at, saved.created_at);
            assert_eq!(loaded.updated_at, saved.updated_at);
        }
    }

    #[test]
    fn test_overwrite_preserves_created_at() {
        for (store, _dir) in stores() {
            let first = store.put("Casa", &lithium_100ah()).unwrap();
            thread::sleep(std::time::Duration::from_millis(5));

            let mut changed = lithium_100ah();
            changed.battery_capacity = 200.0;
            let second = store.put("Casa", &changed).unwrap();

            assert!(!second.is_new());
            assert_eq!(second.created_at, first.created_at);
            assert!(second.updated_at > first.updated_at);
            assert_eq!(store.get("Casa").unwrap().settings.battery_capacity, 200.0);
            assert_eq!(store.info().unwrap().count, 1);
        }
    }

    #[test]
    fn test_list_summaries() {
        for (store, _dir) in stores() {
            store.put("Batería Litio 100Ah Casa", &lithium_100ah()).unwrap();
            store.put("Plomo", &ChargerSettings::default()).unwrap();

            let list = store.list().unwrap();
            assert_eq!(list.len(), 2);
            let summary = &list["Batería Litio 100Ah Casa"];
            assert_eq!(summary.battery_capacity, 100.0);
            assert_eq!(summary.chemistry.as_str(), "lithium");
            assert_eq!(list["Plomo"].chemistry.as_str(), "lead-acid");
        }
    }

    #[test]
    fn test_delete_then_get_is_not_found() {
        for (store, _dir) in stores() {
            store.put("Casa", &lithium_100ah()).unwrap();
            store.delete("Casa").unwrap();

            assert!(store.get("Casa").unwrap_err().is_not_found());
            assert!(store.delete("Casa").unwrap_err().is_not_found());
            assert!(!store.contains("Casa").unwrap());
        }
    }

    #[test]
    fn test_awkward_names() {
        let names = [
            "Batería GEL 150Ah Oficina",
            "AGM 120Ah Respaldo UPS",
            "../../etc/passwd",
            "a/b\\c",
            "time: 12:00?",
            "..",
            "CON",
            "名前",
        ];
        for (store, _dir) in stores() {
            for name in names {
                store.put(name, &lithium_100ah()).unwrap();
            }
            let list = store.list().unwrap();
            for name in names {
                assert!(list.contains_key(name), "{} missing", name);
                assert_eq!(store.get(name).unwrap().name, name);
            }
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        let store = ConfigStore::open_in_memory().unwrap();
        assert!(matches!(
            store.put("", &lithium_100ah()),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("configurations.db");
        let files = dir.path().join("configs");

        for (kind, path) in [(BackendKind::Sqlite, &db), (BackendKind::Files, &files)] {
            let created = {
                let store = ConfigStore::open(kind, path).unwrap();
                store.put("Casa", &lithium_100ah()).unwrap().created_at
            };
            let store = ConfigStore::open(kind, path).unwrap();
            let loaded = store.get("Casa").unwrap();
            assert_eq!(loaded.created_at, created);
            assert_eq!(loaded.settings, lithium_100ah());

            let info = store.info().unwrap();
            assert_eq!(info.backend, kind);
            assert_eq!(info.count, 1);
        }
    }

    #[test]
    fn test_concurrent_puts_keep_created_at() {
        for (store, _dir) in stores() {
            let store = Arc::new(store);
            let first = store.put("Casa", &lithium_100ah()).unwrap();

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        let mut s = lithium_100ah();
                        s.battery_capacity = 100.0 + f64::from(i);
                        store.put("Casa", &s).unwrap()
                    })
                })
                .collect();

            for handle in handles {
                let record = handle.join().unwrap();
                assert_eq!(record.created_at, first.created_at);
            }
            assert_eq!(store.get("Casa").unwrap().created_at, first.created_at);
        }
    }

    #[test]
    fn test_concurrent_different_names() {
        for (store, _dir) in stores() {
            let store = Arc::new(store);
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        let name = format!("perfil {}", i);
                        store.put(&name, &lithium_100ah()).unwrap();
                        store.get(&name).unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(store.list().unwrap().len(), 8);
        }
    }

    #[test]
    fn test_lock_table_only_holds_names_in_use() {
        let store = ConfigStore::open_in_memory().unwrap();
        for i in 0..100 {
            assert!(store.get(&format!("missing {}", i)).unwrap_err().is_not_found());
        }
        assert_eq!(store.lock_table_len(), 0);

        store.put("Casa", &lithium_100ah()).unwrap();
        store.get("Casa").unwrap();
        store.list().unwrap();
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.lock_table_len(), 0);

        store.delete("Casa").unwrap();
        assert!(store.delete("Casa").is_err());
        assert_eq!(store.lock_table_len(), 0);
    }

    #[test]
    fn test_lock_table_drains_after_contention() {
        let store = Arc::new(ConfigStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..20 {
                        store.put("Casa", &lithium_100ah()).unwrap();
                        store.get("Casa").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.lock_table_len(), 0);
    }
}
