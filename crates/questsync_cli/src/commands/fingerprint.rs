//! Fingerprint command implementation.

use super::read_state;
use questsync_codec::{to_canonical_cbor, Fingerprint, SnapshotCodec};
use std::path::Path;

/// Runs the fingerprint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let state = read_state(path)?;
    // Validates the shape the engine would push.
    SnapshotCodec::new().encode(&state, 0)?;

    let bytes = to_canonical_cbor(&state)?;
    let fingerprint = Fingerprint::of_bytes(&bytes);

    println!("{fingerprint}");
    println!("  canonical size: {} bytes", bytes.len());
    Ok(())
}
