//! Markers command implementation.

use super::CliError;
use questsync_storage::{FileStore, KeyValueStore, LocalMarkers};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Persisted markers for one user.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UserMarkers {
    /// User id.
    pub uid: String,
    /// Local reset epoch.
    pub reset_epoch: i64,
}

/// Contents of a marker store.
#[derive(Debug, Serialize)]
pub struct MarkersReport {
    /// Store path.
    pub path: String,
    /// Records in the log, including superseded ones.
    pub records: usize,
    /// Live keys.
    pub keys: usize,
    /// Last signed-in user.
    pub last_uid: Option<String>,
    /// Per-user markers.
    pub users: Vec<UserMarkers>,
}

/// Collects the markers stored at `path`.
pub fn collect(path: &Path) -> Result<MarkersReport, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(CliError::MissingStore(path.to_path_buf()).into());
    }

    let store = Arc::new(FileStore::open(path)?);
    let records = store.record_count();
    let keys = store.keys()?.len();
    let markers = LocalMarkers::new(store);

    let mut users = Vec::new();
    for uid in markers.known_uids()? {
        let reset_epoch = markers.reset_epoch(&uid)?;
        users.push(UserMarkers { uid, reset_epoch });
    }

    Ok(MarkersReport {
        path: path.display().to_string(),
        records,
        keys,
        last_uid: markers.last_uid()?,
        users,
    })
}

/// Runs the markers command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

fn print_text_output(report: &MarkersReport) {
    println!("Marker store: {}", report.path);
    println!("  Records:  {}", report.records);
    println!("  Keys:     {}", report.keys);
    println!(
        "  Last uid: {}",
        report.last_uid.as_deref().unwrap_or("(none)")
    );
    if report.users.is_empty() {
        println!("  No reset epochs recorded");
        return;
    }
    println!();
    println!("  Reset epochs:");
    for user in &report.users {
        println!("    {:<32} {}", user.uid, user.reset_epoch);
    }
}
