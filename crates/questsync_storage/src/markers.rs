//! Typed access to the sync engine's persisted markers.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use questsync_codec::Value;
use std::sync::Arc;
use tracing::debug;

/// Key holding the uid of the last signed-in user.
pub const LAST_UID_KEY: &str = "last_uid";

/// Prefix of the per-user reset epoch keys.
pub const RESET_EPOCH_PREFIX: &str = "reset_epoch:";

/// Key holding the reset epoch for `uid`.
pub fn reset_epoch_key(uid: &str) -> String {
    format!("{RESET_EPOCH_PREFIX}{uid}")
}

/// The markers a device remembers between sessions.
///
/// - the last signed-in uid, so a cold start can tell whether the same user
///   is coming back
/// - one reset epoch per uid, incremented whenever local state is wiped, so
///   documents written before the wipe can be recognized and ignored
#[derive(Clone)]
pub struct LocalMarkers {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalMarkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMarkers").finish_non_exhaustive()
    }
}

impl LocalMarkers {
    /// Wraps a key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The uid of the last signed-in user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the marker is not text.
    pub fn last_uid(&self) -> StorageResult<Option<String>> {
        match self.store.get(LAST_UID_KEY)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(uid)) => Ok(Some(uid)),
            Some(other) => Err(StorageError::UnexpectedType {
                key: LAST_UID_KEY.to_string(),
                expected: "text",
                found: other.kind(),
            }),
        }
    }

    /// Records `uid` as the last signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_last_uid(&self, uid: &str) -> StorageResult<()> {
        self.store.put(LAST_UID_KEY, Value::from(uid))
    }

    /// Forgets the last signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    pub fn clear_last_uid(&self) -> StorageResult<()> {
        self.store.remove(LAST_UID_KEY)
    }

    /// The reset epoch for `uid`. Users that never reset are at epoch 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the marker is not an integer.
    pub fn reset_epoch(&self, uid: &str) -> StorageResult<i64> {
        let key = reset_epoch_key(uid);
        match self.store.get(&key)? {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Integer(epoch)) => Ok(epoch),
            Some(other) => Err(StorageError::UnexpectedType {
                key,
                expected: "integer",
                found: other.kind(),
            }),
        }
    }

    /// Overwrites the reset epoch for `uid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_reset_epoch(&self, uid: &str, epoch: i64) -> StorageResult<()> {
        self.store.put(&reset_epoch_key(uid), Value::Integer(epoch))
    }

    /// Increments the reset epoch for `uid` and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the current epoch cannot be read or the new one
    /// cannot be written, and [`StorageError::EpochOverflow`] when the epoch
    /// is already `i64::MAX`.
    pub fn bump_reset_epoch(&self, uid: &str) -> StorageResult<i64> {
        let epoch = self.reset_epoch(uid)?;
        let next = epoch.checked_add(1).ok_or_else(|| StorageError::EpochOverflow {
            uid: uid.to_string(),
            epoch,
        })?;
        self.set_reset_epoch(uid, next)?;
        debug!(uid, epoch = next, "bumped reset epoch");
        Ok(next)
    }

    /// Every uid that has a reset epoch recorded, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed.
    pub fn known_uids(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(RESET_EPOCH_PREFIX).map(str::to_string))
            .collect())
    }
}
