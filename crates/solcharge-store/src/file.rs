//! Directory-of-files backend.
//!
//! Each configuration lives in `<dir>/<key>.json`. Writes go to a hidden
//! temporary file that is fsynced and renamed over the target, after which
//! the directory itself is fsynced, so readers see either the old or the new
//! record and never a torn one.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::error::{Error, Result};
use crate::key::StorageKey;

const EXTENSION: &str = ".json";
const TMP_PREFIX: &str = ".tmp-";

/// Longest file name most filesystems accept.
const MAX_FILE_NAME: usize = 255;

/// Stores each configuration as a JSON file in a directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a storage directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| Error::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        info!("Using configuration directory {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &StorageKey) -> Result<PathBuf> {
        let file_name = format!("{}{}", key.as_str(), EXTENSION);
        if TMP_PREFIX.len() + file_name.len() > MAX_FILE_NAME {
            return Err(Error::InvalidName(format!(
                "name encodes to {} bytes, too long for a file name",
                key.as_str().len()
            )));
        }
        Ok(self.dir.join(file_name))
    }

    fn sync_dir(&self) -> Result<()> {
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn write_durable(&self, key: &StorageKey, bytes: &[u8]) -> Result<()> {
        let target = self.path_for(key)?;
        let tmp = self
            .dir
            .join(format!("{}{}{}", TMP_PREFIX, key.as_str(), EXTENSION));

        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &target)?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        self.sync_dir()?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    fn read_durable(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self) -> Result<Vec<StorageKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            let Some(raw) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            match StorageKey::from_raw(raw) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("Ignoring unexpected file {}: {}", name, e),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete_durable(&self, key: &StorageKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => {
                self.sync_dir()?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Files
    }
}
