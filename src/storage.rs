//! Storage adapters for the Scrip SDK

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Result, ScripError};

/// Storage keys
pub mod keys {
    pub const STATE: &str = concat!("scrip:", "state");
}

/// Storage adapter trait for custom storage implementations.
///
/// The engine stores JSON-encoded values. Adapters must be durable: a value
/// written by `set` must be visible to a later `get` from a new process.
pub trait StorageAdapter: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> Option<String>;

    /// Set a value by key
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value by key
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage adapter, mostly useful for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    cache: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| ScripError::internal("storage lock poisoned"))?;
        cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| ScripError::internal("storage lock poisoned"))?;
        cache.remove(key);
        Ok(())
    }
}

/// File-based storage adapter.
///
/// Stores engine state in `scrip.json` within the given storage root. One
/// engine instance must own a storage root exclusively; pointing two instances
/// at the same root is unsupported.
pub struct FileStorage {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) storage under `storage_root`. The directory is created
    /// if it does not exist. An existing file that cannot be parsed is an
    /// internal error; use [`FileStorage::reset`] to recover by wiping.
    pub fn new(storage_root: &Path) -> Result<Self> {
        if !storage_root.is_dir() {
            std::fs::create_dir_all(storage_root).map_err(|e| {
                ScripError::internal(format!("failed to create storage root: {e}"))
            })?;
        }

        let path = storage_root.join("scrip.json");

        let cache = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ScripError::internal(format!("failed to read datastore: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| ScripError::internal(format!("datastore is corrupt: {e}")))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    /// Wipe the datastore file under `storage_root` and return a fresh store.
    pub fn reset(storage_root: &Path) -> Result<Self> {
        let path = storage_root.join("scrip.json");
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| ScripError::internal(format!("failed to reset datastore: {e}")))?;
        }
        Self::new(storage_root)
    }

    /// Save the cache to disk
    fn save(&self) -> Result<()> {
        let cache = self
            .cache
            .read()
            .map_err(|_| ScripError::internal("storage lock poisoned"))?;
        let contents = serde_json::to_string_pretty(&*cache)?;
        std::fs::write(&self.path, contents)
            .map_err(|e| ScripError::internal(format!("failed to write datastore: {e}")))
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| ScripError::internal("storage lock poisoned"))?;
            cache.insert(key.to_string(), value.to_string());
        }
        self.save()
    }

    fn remove(&self, key: &str) -> Result<()> {
        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| ScripError::internal("storage lock poisoned"))?;
            cache.remove(key);
        }
        self.save()
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish()
    }
}
