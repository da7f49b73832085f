//! Key-value persistence behind every piece of local state.
//!
//! Platforms hand the engine a [`Store`] (SharedPreferences, UserDefaults, a JSON file...).
//! The engine never touches ambient global state; it goes through a [`SharedStore`], which
//! serializes every read-modify-write so two concurrent syncs cannot lose each other's writes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Serialize, de::DeserializeOwned};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt value under `{key}`: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// A synchronous string key-value store.
///
/// Implementations must make each individual call atomic. Multi-step updates are the
/// responsibility of [`SharedStore`].
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// A cloneable handle to a [`Store`] with a single-writer lock for read-modify-write updates.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<dyn Store>,
    writer: Arc<Mutex<()>>,
}

impl SharedStore {
    pub fn new(store: impl Store + 'static) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<dyn Store>) -> Self {
        Self {
            inner: store,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    pub fn set_string(&self, key: &str, value: impl Into<String>) -> Result<(), StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        self.inner.set(key, value.into())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        self.inner.remove(key)
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.inner.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        self.set_string(key, encoded)
    }

    /// Atomically load, modify and save the JSON value under `key`.
    /// A missing value starts from `T::default()`.
    pub fn update_json<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let mut value: T = self.read_json(key)?.unwrap_or_default();
        let result = f(&mut value);
        self.inner.set(key, serde_json::to_string(&value)?)?;
        Ok(result)
    }
}

/// In-memory store, for tests and hosts that do not need persistence.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

#[cfg(feature = "fs")]
pub use file::JsonFileStore;

#[cfg(feature = "fs")]
mod file {
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::{Store, StoreError};

    /// A store kept as one JSON object on disk.
    ///
    /// Every write replaces the file through a temporary file in the same directory, so a crash
    /// leaves either the old or the new document, never a torn one.
    pub struct JsonFileStore {
        path: PathBuf,
        values: Mutex<BTreeMap<String, String>>,
    }

    impl JsonFileStore {
        pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
            let path = path.into();
            let values = match std::fs::read_to_string(&path) {
                Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
                Ok(contents) => {
                    serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                        key: path.display().to_string(),
                        source,
                    })?
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => return Err(e.into()),
            };
            log::debug!("Opened store {} with {} keys", path.display(), values.len());
            Ok(Self {
                path,
                values: Mutex::new(values),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
            let dir = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(serde_json::to_string_pretty(values)?.as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        }
    }

    impl Store for JsonFileStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
            Ok(values.get(key).cloned())
        }

        fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
            let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
            values.insert(key.to_string(), value);
            self.flush(&values)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
            if values.remove(key).is_some() {
                self.flush(&values)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_json_starts_from_default() {
        let store = SharedStore::new(MemoryStore::new());
        let len = store
            .update_json("servers", |servers: &mut Vec<String>| {
                servers.push("Alpha".to_string());
                servers.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        let servers: Vec<String> = store.read_json("servers").unwrap().unwrap();
        assert_eq!(servers, vec!["Alpha".to_string()]);
    }

    #[test]
    fn corrupt_value_reports_its_key() {
        let store = SharedStore::new(MemoryStore::new());
        store.set_string("sync_log", "not json").unwrap();
        let err = store.read_json::<Vec<String>>("sync_log").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "sync_log"));
    }

    #[cfg(feature = "fs")]
    #[test]
    fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("stepcraft.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("device_id", "dev-123".to_string()).unwrap();
        store.set("minecraft_username", "Steve".to_string()).unwrap();
        store.remove("minecraft_username").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("device_id").unwrap().as_deref(), Some("dev-123"));
        assert_eq!(reopened.get("minecraft_username").unwrap(), None);
    }
}
