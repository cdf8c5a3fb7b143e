//! Durable storage for named solar charge-controller profiles.
//!
//! Profiles are stored under operator-chosen names such as
//! `Batería Litio 100Ah Casa`. The store escapes each name into a path-safe
//! [`StorageKey`] and persists the record through a [`Backend`]:
//!
//! - [`SqliteBackend`]: one row per profile in an SQLite database (default)
//! - [`FileBackend`]: one JSON file per profile in a directory
//!
//! # Example
//!
//! ```no_run
//! use solcharge_store::ConfigStore;
//! use solcharge_types::ChargerSettings;
//!
//! let store = ConfigStore::open_default()?;
//! let record = store.put("Casa", &ChargerSettings::default())?;
//! println!("saved at {}", record.updated_at);
//!
//! for (name, summary) in store.list()? {
//!     println!("{name}: {} Ah {}", summary.battery_capacity, summary.chemistry);
//! }
//! # Ok::<(), solcharge_store::Error>(())
//! ```

mod backend;
mod error;
mod file;
mod key;
mod models;
mod schema;
mod sqlite;
mod store;

pub use backend::{Backend, BackendKind};
pub use error::{Error, Result};
pub use file::FileBackend;
pub use key::StorageKey;
pub use models::{ConfigurationSummary, StoreInfo, StoredConfiguration};
pub use sqlite::SqliteBackend;
pub use store::ConfigStore;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/solcharge/configurations.db`
/// - macOS: `~/Library/Application Support/solcharge/configurations.db`
/// - Windows: `C:\Users\<user>\AppData\Local\solcharge\configurations.db`
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join("configurations.db")
}

/// Default directory for the file backend.
pub fn default_files_dir() -> std::path::PathBuf {
    default_data_dir().join("configurations")
}

fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("solcharge")
}
