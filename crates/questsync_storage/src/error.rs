//! Error types for storage operations.

use questsync_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be decoded.
    #[error("record encoding error: {0}")]
    Codec(#[from] CodecError),

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The reset epoch is already at its maximum.
    #[error("reset epoch for `{uid}` cannot be incremented past {epoch}")]
    EpochOverflow {
        /// User whose epoch overflowed.
        uid: String,
        /// The current epoch.
        epoch: i64,
    },

    /// A marker held a value of the wrong kind.
    #[error("marker `{key}` holds {found}, expected {expected}")]
    UnexpectedType {
        /// Marker key.
        key: String,
        /// Kind that was expected.
        expected: &'static str,
        /// Kind that was found.
        found: &'static str,
    },
}
