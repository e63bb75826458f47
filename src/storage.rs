use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Device-scoped keyed storage holding JSON values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

pub const STORE_FILE_NAME: &str = "local-store.json";

/// `~/.bumpmate`, or the current directory when no home is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bumpmate")
}

/// A JSON map persisted to a single file.
///
/// Every `set` rewrites the whole file through a temporary file and an
/// atomic rename, so a crash never leaves a half-written store behind.
pub struct FileStore {
    storage_path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir)?;
        let storage_path = data_dir.join(STORE_FILE_NAME);

        let data = if storage_path.exists() {
            let mut file = File::open(&storage_path)?;
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&contents) {
                    Ok(data) => data,
                    Err(err) => {
                        let aside = storage_path.with_extension("json.corrupt");
                        tracing::warn!(
                            path = %storage_path.display(),
                            moved_to = %aside.display(),
                            error = %err,
                            "local store is unreadable, starting empty"
                        );
                        fs::rename(&storage_path, &aside)?;
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %storage_path.display(), keys = data.len(), "opened local store");
        Ok(Self {
            storage_path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn save(&self, data: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.storage_path.with_extension("tmp");
        let mut f = File::create(&temp)?;
        let content = serde_json::to_string_pretty(data)?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
        fs::rename(temp, &self.storage_path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        data.insert(key.to_string(), value);
        self.save(&data)
    }
}

/// In-process store. Counts writes so callers can observe them.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        data.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unreadable_store_is_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILE_NAME), "{not json").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("parenting_app_config").unwrap(), None);
        assert!(store.path().with_extension("json.corrupt").exists());

        store.set("parenting_app_config", json!({"role": "dad"})).unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("parenting_app_config").unwrap(),
            Some(json!({"role": "dad"}))
        );
    }

    #[test]
    fn file_store_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(store.get("missing").unwrap(), None);
            store.set("parenting_app_config", json!({"role": "mom"})).unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("parenting_app_config").unwrap(),
            Some(json!({"role": "mom"}))
        );
        assert!(!reopened.path().with_extension("tmp").exists());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILE_NAME), "{not json").unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(StorageError::Json(_))));
    }

    #[test]
    fn memory_store_counts_writes() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).unwrap();
        store.set("a", json!(2)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(2)));
        assert_eq!(store.writes(), 2);
    }
}
