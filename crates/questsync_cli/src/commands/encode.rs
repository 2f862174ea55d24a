//! Encode command implementation.

use super::read_state;
use questsync_codec::{SnapshotCodec, Value};
use std::path::Path;

/// Builds the document the engine would write for a state file.
pub fn document(path: &Path, epoch: i64) -> Result<Value, Box<dyn std::error::Error>> {
    let state = read_state(path)?;
    let wire = SnapshotCodec::new().encode(&state, epoch)?;
    Ok(wire.into_value())
}

/// Runs the encode command.
pub fn run(path: &Path, epoch: i64) -> Result<(), Box<dyn std::error::Error>> {
    let doc = document(path, epoch)?;
    println!("{}", serde_json::to_string_pretty(&doc.to_json()?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use questsync_codec::RESET_EPOCH_FIELD;
    use std::io::Write;

    #[test]
    fn document_carries_epoch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"xp": 1}}"#).unwrap();
        let doc = document(file.path(), 4).unwrap();
        assert_eq!(doc.get(RESET_EPOCH_FIELD), Some(&Value::Integer(4)));
        assert_eq!(doc.get("xp"), Some(&Value::Integer(1)));
    }

    #[test]
    fn reserved_fields_are_refused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"updatedAt": 1}}"#).unwrap();
        assert!(document(file.path(), 0).is_err());
    }
}
