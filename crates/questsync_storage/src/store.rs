//! Key-value store trait definition.

use crate::error::StorageResult;
use questsync_codec::Value;

/// Durable local key-value storage.
///
/// Holds the few markers the sync engine must remember across restarts.
/// Stores use interior mutability so one instance can be shared behind an
/// `Arc` between the engine and tooling.
///
/// # Invariants
///
/// - `get` returns the value of the most recent `put` for that key, or
///   `None` after `remove`
/// - a successful `put` or `remove` survives process termination for
///   persistent implementations
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }
}
