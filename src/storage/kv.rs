//! Safe key-value storage wrapper
//!
//! The underlying store may be absent, quota-limited, or broken in the host
//! environment. `SafeStorage` converts every failure into `None`/`false` so
//! callers never need a recovery path.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::{Error, Result};

const AVAILABILITY_PROBE_KEY: &str = "__storage_test__";

/// Synchronous key-value store the host environment provides
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Non-throwing wrapper over a `KeyValueStore`
///
/// Every failure is logged at `warn` and swallowed.
#[derive(Clone)]
pub struct SafeStorage {
    inner: Arc<dyn KeyValueStore>,
}

impl SafeStorage {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Get a value, or `None` if missing or the store failed
    pub fn get(&self, key: &str) -> Option<String> {
        match self.inner.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("storage get failed for key {:?}: {}", key, e);
                None
            }
        }
    }

    /// Set a value; `false` if the store failed
    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.inner.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!("storage set failed for key {:?}: {}", key, e);
                false
            }
        }
    }

    /// Remove a value; `false` if the store failed
    pub fn remove(&self, key: &str) -> bool {
        match self.inner.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("storage remove failed for key {:?}: {}", key, e);
                false
            }
        }
    }

    /// All keys, or an empty list if enumeration failed
    pub fn keys(&self) -> Vec<String> {
        match self.inner.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("storage key enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Trial write+remove of a throwaway key
    ///
    /// Some stores report as present but fail on first use.
    pub fn is_available(&self) -> bool {
        if self.inner.set(AVAILABILITY_PROBE_KEY, "test").is_err() {
            return false;
        }
        self.inner.remove(AVAILABILITY_PROBE_KEY).is_ok()
    }
}

/// In-memory store, for tests and hosts without durable storage
#[derive(Default)]
pub struct MemoryKvStore {
    map: DashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.map.iter().map(|e| e.key().clone()).collect())
    }
}

/// Single-file JSON store
///
/// The whole map is rewritten on every mutation; entries are small (nonces,
/// one wallet-cache blob), so this stays cheap.
pub struct FileKvStore {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileKvStore {
    /// Open the store, loading any existing file
    ///
    /// A corrupt or unreadable file starts the store empty rather than
    /// failing; the next successful write replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<HashMap<String, String>>(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!("ignoring corrupt key-value file {:?}: {}", path, e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            map: Mutex::new(map),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let data = serde_json::to_string(map)?;
        std::fs::write(&self.path, data).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .map
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        map.remove(key);
        self.persist(&map)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let map = self
            .map
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(map.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store that fails every operation, simulating a disabled or
    /// quota-exceeded backend
    struct FaultyKvStore;

    impl KeyValueStore for FaultyKvStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("store disabled".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("quota exceeded".into()))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("store disabled".into()))
        }

        fn keys(&self) -> Result<Vec<String>> {
            Err(Error::Storage("store disabled".into()))
        }
    }

    #[test]
    fn test_safe_storage_roundtrip() {
        let storage = SafeStorage::new(Arc::new(MemoryKvStore::new()));

        assert!(storage.set("a", "1"));
        assert_eq!(storage.get("a"), Some("1".to_string()));
        assert!(storage.remove("a"));
        assert_eq!(storage.get("a"), None);
    }

    #[test]
    fn test_safe_storage_never_propagates_failures() {
        let storage = SafeStorage::new(Arc::new(FaultyKvStore));

        assert_eq!(storage.get("a"), None);
        assert!(!storage.set("a", "1"));
        assert!(!storage.remove("a"));
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn test_is_available() {
        let good = SafeStorage::new(Arc::new(MemoryKvStore::new()));
        assert!(good.is_available());

        let bad = SafeStorage::new(Arc::new(FaultyKvStore));
        assert!(!bad.is_available());
    }

    #[test]
    fn test_availability_probe_leaves_no_key_behind() {
        let inner = Arc::new(MemoryKvStore::new());
        let storage = SafeStorage::new(inner.clone());

        assert!(storage.is_available());
        assert!(inner.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");

        {
            let store = FileKvStore::open(&path);
            store.set("k", "v").unwrap();
        }

        let store = FileKvStore::open(&path);
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_file_store_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileKvStore::open(&path);
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.keys().unwrap().is_empty());
    }
}
