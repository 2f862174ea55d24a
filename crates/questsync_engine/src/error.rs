//! Error types for the sync engine.

use questsync_codec::CodecError;
use questsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// None of these are fatal. The engine converts each one into a status
/// update at the point where it happens and stays usable afterwards.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The document store or identity provider is not configured.
    #[error("sync is not configured")]
    NotConfigured,

    /// Signing in or out failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A push failed for a reason that may go away (network, quota).
    #[error("write failed: {0}")]
    TransientWrite(StoreError),

    /// The store refused an operation outright.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A remote snapshot predates a local reset and was dropped.
    #[error("stale snapshot ignored (remote epoch {remote}, local epoch {local})")]
    StaleData {
        /// Epoch carried by the remote document.
        remote: i64,
        /// Locally persisted epoch.
        local: i64,
    },

    /// A remote document could not be decoded.
    #[error("malformed remote document: {0}")]
    Decode(CodecError),

    /// Local state could not be encoded for upload.
    #[error("invalid local state: {0}")]
    Codec(CodecError),

    /// The local marker store failed.
    #[error("local storage error: {0}")]
    Storage(#[from] StorageError),

    /// No signed-in user.
    #[error("not signed in")]
    SignedOut,

    /// `init()` was called outside a tokio runtime.
    #[error("no tokio runtime available for sync timers")]
    NoRuntime,

    /// The engine has been disposed.
    #[error("sync engine disposed")]
    Disposed,
}

impl SyncError {
    /// Returns true if a failed push with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientWrite(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            SyncError::TransientWrite(err)
        } else {
            SyncError::Store(err)
        }
    }
}

/// Errors reported by a [`crate::DocumentStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller may not access the document.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The caller exceeded its write quota.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Any other store failure.
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Network and quota failures are worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::QuotaExceeded(_))
    }
}

/// Errors reported by an [`crate::IdentityProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The interactive popup could not be opened.
    #[error("sign-in popup was blocked")]
    PopupBlocked,

    /// The user dismissed the sign-in flow.
    #[error("sign-in was cancelled")]
    Cancelled,

    /// The provider has no credentials configured.
    #[error("identity provider is not configured")]
    NotConfigured,

    /// Any other provider failure.
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(StoreError::Unavailable("offline".into())).is_retryable());
        assert!(SyncError::from(StoreError::QuotaExceeded("writes".into())).is_retryable());
        assert!(!SyncError::from(StoreError::PermissionDenied("rules".into())).is_retryable());
        assert!(!SyncError::Auth(AuthError::Cancelled).is_retryable());
        assert!(!SyncError::NotConfigured.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::from(StoreError::Unavailable("offline".into()));
        assert_eq!(err.to_string(), "write failed: store unavailable: offline");

        let err = SyncError::StaleData {
            remote: 1,
            local: 2,
        };
        assert!(err.to_string().contains("remote epoch 1"));
        assert!(err.to_string().contains("local epoch 2"));

        let err = SyncError::from(AuthError::PopupBlocked);
        assert_eq!(err.to_string(), "authentication failed: sign-in popup was blocked");
    }
}
