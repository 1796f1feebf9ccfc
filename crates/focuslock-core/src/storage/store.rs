//! Key-value persistence port.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PersistenceError;

/// Durable byte store. Every call carries a caller-supplied timeout.
pub trait PersistenceStore: Send {
    fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), PersistenceError>;
}

/// Read and decode a JSON blob. A missing key is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn PersistenceStore,
    key: &str,
    timeout: Duration,
) -> Result<Option<T>, PersistenceError> {
    let Some(bytes) = store.get(key, timeout)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistenceError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn PersistenceStore,
    key: &str,
    value: &T,
    timeout: Duration,
) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec(value).map_err(|e| PersistenceError::Codec {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.set(key, &bytes, timeout)
}

/// In-process store. Clones share the same map.
///
/// `set_failing(true)` makes every call fail, to exercise retry paths;
/// `set_key_failing` does the same for a single key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_key_failing(&self, key: &str, failing: bool) {
        let mut keys = self.failing_keys.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn check(&self, key: &str) -> Result<(), PersistenceError> {
        let key_failing = self
            .failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key);
        if key_failing || self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("store unavailable".into()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistenceStore for MemoryStore {
    fn get(&self, key: &str, _timeout: Duration) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.check(key)?;
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8], _timeout: Duration) -> Result<(), PersistenceError> {
        self.check(key)?;
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn json_helpers_round_trip_through_store() {
        let store = MemoryStore::new();
        assert_eq!(load_json::<Vec<u32>>(&store, "k", T).unwrap(), None);
        save_json(&store, "k", &vec![1u32, 2, 3], T).unwrap();
        assert_eq!(load_json::<Vec<u32>>(&store, "k", T).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn corrupt_blob_is_a_codec_error() {
        let store = MemoryStore::new();
        store.set("k", b"not json", T).unwrap();
        assert!(matches!(
            load_json::<Vec<u32>>(&store, "k", T),
            Err(PersistenceError::Codec { .. })
        ));
    }

    #[test]
    fn failing_store_rejects_calls() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.set("k", b"1", T).is_err());
        store.set_failing(false);
        assert!(store.set("k", b"1", T).is_ok());
        assert!(store.contains("k"));
    }

    #[test]
    fn single_failing_key_leaves_others_writable() {
        let store = MemoryStore::new();
        store.set_key_failing("a", true);
        assert!(store.set("a", b"1", T).is_err());
        assert!(store.set("b", b"1", T).is_ok());
        store.set_key_failing("a", false);
        assert!(store.get("a", T).unwrap().is_none());
        assert!(store.set("a", b"1", T).is_ok());
    }
}
