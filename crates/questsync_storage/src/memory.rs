//! In-memory key-value store for testing.

use crate::error::StorageResult;
use crate::store::KeyValueStore;
use parking_lot::RwLock;
use questsync_codec::Value;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// Nothing survives the process; use it for tests and for sessions that
/// should not leave markers behind.
///
/// # Example
///
/// ```rust
/// use questsync_storage::{InMemoryStore, KeyValueStore};
/// use questsync_codec::Value;
///
/// let store = InMemoryStore::new();
/// store.put("last_uid", Value::from("u1")).unwrap();
/// assert_eq!(store.get("last_uid").unwrap(), Some(Value::from("u1")));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
