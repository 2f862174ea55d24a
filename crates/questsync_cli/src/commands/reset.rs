//! Reset command implementation.

use questsync_storage::{FileStore, LocalMarkers};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Bumps the reset epoch of `uid` and returns the new value.
///
/// The next time this device syncs as `uid`, remote documents written
/// before the bump are ignored.
pub fn bump(path: &Path, uid: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let store = FileStore::open_with_create_dirs(path)?;
    let markers = LocalMarkers::new(Arc::new(store));
    let epoch = markers.bump_reset_epoch(uid)?;
    info!(uid, epoch, "reset epoch bumped");
    Ok(epoch)
}

/// Runs the reset command.
pub fn run(path: &Path, uid: &str) -> Result<(), Box<dyn std::error::Error>> {
    let epoch = bump(path, uid)?;
    println!("Reset epoch for {uid} is now {epoch}");
    Ok(())
}
