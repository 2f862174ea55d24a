//! CLI command implementations.

pub mod encode;
pub mod fingerprint;
pub mod markers;
pub mod reset;
pub mod simulate;

use questsync_codec::{CodecError, Value};
use questsync_engine::SyncError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by command input handling.
#[derive(Debug, Error)]
pub enum CliError {
    /// The marker store does not exist.
    #[error("no marker store found at {0:?}")]
    MissingStore(PathBuf),

    /// A state file could not be read.
    #[error("failed to read {path:?}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A state file is not valid JSON.
    #[error("invalid JSON in {path:?}: {source}")]
    Json {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A simulation argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A sync engine operation failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A state could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Reads a JSON file into a document value.
pub fn read_state(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_state_parses_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"xp": 5, "tasks": []}}"#).unwrap();
        let state = read_state(file.path()).unwrap();
        assert_eq!(state.get("xp"), Some(&Value::Integer(5)));
    }

    #[test]
    fn read_state_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(read_state(file.path()), Err(CliError::Json { .. })));
    }

    #[test]
    fn read_state_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_state(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));
    }
}
