//! Simulate command implementation.
//!
//! Runs several engines signed in as the same user against one in-memory
//! document store, spreads edits across them and reports whether they
//! converged and how many writes it took.

use super::CliError;
use parking_lot::Mutex;
use questsync_codec::{Fingerprint, Value};
use questsync_engine::{
    BackoffPolicy, LocalSnapshotSource, MemoryDocumentStore, MockIdentityProvider, RemoteApplier,
    StoreError, SyncConfig, SyncEngine, UserInfo,
};
use questsync_storage::{InMemoryStore, LocalMarkers};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

const SIM_UID: &str = "sim-user";

/// Parameters for one simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of devices.
    pub devices: usize,
    /// Edits, assigned round-robin.
    pub edits: usize,
    /// Debounce delay for every engine.
    pub debounce: Duration,
    /// Writes the store rejects as unavailable before accepting one.
    pub fail_writes: usize,
}

/// Final state of one simulated device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device index.
    pub device: usize,
    /// Final engine state.
    pub state: String,
    /// Last error, if any.
    pub error: Option<String>,
    /// Short fingerprint of the final local state.
    pub fingerprint: String,
    /// Writes this device made.
    pub pushes_written: u64,
    /// Remote snapshots this device applied.
    pub snapshots_applied: u64,
    /// Echoes this device ignored.
    pub echoes_ignored: u64,
    /// Retries this device scheduled.
    pub retries_scheduled: u64,
}

/// Outcome of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Whether every device ended with the same state.
    pub converged: bool,
    /// Edits made.
    pub edits: usize,
    /// Writes the store accepted.
    pub writes: usize,
    /// Write attempts, including rejected ones.
    pub attempts: usize,
    /// Per-device results.
    pub devices: Vec<DeviceReport>,
}

struct SimDevice {
    engine: Arc<SyncEngine>,
    local: Arc<Mutex<Value>>,
    _getter: Arc<dyn LocalSnapshotSource>,
}

impl SimDevice {
    fn new(store: &MemoryDocumentStore, config: SyncConfig) -> Result<Self, CliError> {
        let identity = MockIdentityProvider::new(UserInfo::new(SIM_UID));
        let markers = LocalMarkers::new(Arc::new(InMemoryStore::new()));
        let engine = SyncEngine::new(config, Arc::new(store.clone()), Arc::new(identity), markers);

        let local = Arc::new(Mutex::new(Value::map([
            ("tasks", Value::Array(Vec::new())),
            ("xp", Value::Integer(0)),
        ])));

        let source = Arc::clone(&local);
        let getter: Arc<dyn LocalSnapshotSource> = Arc::new(move || source.lock().clone());
        engine.set_local_snapshot_getter(&getter);

        let sink = Arc::clone(&local);
        let weak: Weak<SyncEngine> = Arc::downgrade(&engine);
        let applier: Arc<dyn RemoteApplier> = Arc::new(move |state: &Value| {
            *sink.lock() = state.clone();
            if let Some(engine) = weak.upgrade() {
                engine.notify_local_change();
            }
        });
        engine.set_remote_applier(applier);
        engine.init()?;

        Ok(Self {
            engine,
            local,
            _getter: getter,
        })
    }

    fn edit(&self, n: usize) {
        {
            let mut local = self.local.lock();
            let mut fields = local.as_map().cloned().unwrap_or_default();
            let mut tasks = fields
                .get("tasks")
                .and_then(Value::as_array)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            tasks.push(Value::map([
                ("title", Value::Text(format!("task {n}"))),
                ("done", Value::Bool(false)),
            ]));
            let xp = fields.get("xp").and_then(Value::as_integer).unwrap_or(0);
            fields.insert("tasks".into(), Value::Array(tasks));
            fields.insert("xp".into(), Value::Integer(xp + 10));
            *local = Value::Map(fields);
        }
        self.engine.notify_local_change();
    }

    fn fingerprint(&self) -> Result<Fingerprint, CliError> {
        Ok(Fingerprint::of(&self.local.lock())?)
    }
}

/// Runs a simulation and returns its report.
pub async fn simulate(
    options: &SimulateOptions,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    if options.devices == 0 {
        return Err(CliError::InvalidArgument("at least one device is required".into()).into());
    }

    let base = options.debounce.max(Duration::from_millis(1));
    let config = SyncConfig::new()
        .with_debounce(options.debounce)
        .with_backoff(BackoffPolicy::new(base, base * 16));
    let settle = options.debounce * 3;

    let store = MemoryDocumentStore::new();
    if options.fail_writes > 0 {
        store.fail_next_writes(
            StoreError::Unavailable("simulated outage".into()),
            options.fail_writes,
        );
    }

    // Devices join one at a time so the first one seeds the document.
    let mut devices = Vec::with_capacity(options.devices);
    for index in 0..options.devices {
        let device = SimDevice::new(&store, config.clone())?;
        device.engine.sign_in().await.map_err(CliError::from)?;
        info!(device = index, "device signed in");
        devices.push(device);
        tokio::time::sleep(settle).await;
    }

    for n in 0..options.edits {
        devices[n % devices.len()].edit(n);
        tokio::time::sleep(settle).await;
    }

    // Let retries drain. A device waiting on a retry reports an error
    // until its next write succeeds.
    let mut waited = Duration::ZERO;
    let rounds = u32::try_from(options.fail_writes.saturating_add(2)).unwrap_or(u32::MAX);
    let limit = base.saturating_mul(16).saturating_mul(rounds);
    let unsettled = |d: &SimDevice| {
        let status = d.engine.get_status();
        status.state.is_busy() || status.error.is_some()
    };
    while devices.iter().any(unsettled) && waited < limit {
        tokio::time::sleep(settle).await;
        waited += settle;
    }

    let mut reports = Vec::with_capacity(devices.len());
    let mut fingerprints = Vec::with_capacity(devices.len());
    for (index, device) in devices.iter().enumerate() {
        let status = device.engine.get_status();
        let stats = device.engine.stats();
        let fingerprint = device.fingerprint()?;
        fingerprints.push(fingerprint);
        reports.push(DeviceReport {
            device: index,
            state: status.state.to_string(),
            error: status.error,
            fingerprint: fingerprint.short(),
            pushes_written: stats.pushes_written,
            snapshots_applied: stats.snapshots_applied,
            echoes_ignored: stats.echoes_ignored,
            retries_scheduled: stats.retries_scheduled,
        });
    }
    for device in &devices {
        device.engine.dispose();
    }

    Ok(SimulationReport {
        converged: fingerprints.windows(2).all(|w| w[0] == w[1]),
        edits: options.edits,
        writes: store.write_count(),
        attempts: store.attempt_count(),
        devices: reports,
    })
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(options))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    if !report.converged {
        return Err("devices did not converge".into());
    }
    Ok(())
}

fn print_text_output(report: &SimulationReport) {
    println!("Simulation:");
    println!("  Edits:     {}", report.edits);
    println!("  Writes:    {} ({} attempts)", report.writes, report.attempts);
    println!(
        "  Converged: {}",
        if report.converged { "yes" } else { "NO" }
    );
    println!();
    println!(
        "  {:<7} {:<10} {:<10} {:>7} {:>8} {:>6} {:>8}",
        "device", "state", "state fp", "pushes", "applied", "echoes", "retries"
    );
    for device in &report.devices {
        println!(
            "  {:<7} {:<10} {:<10} {:>7} {:>8} {:>6} {:>8}",
            device.device,
            device.state,
            device.fingerprint,
            device.pushes_written,
            device.snapshots_applied,
            device.echoes_ignored,
            device.retries_scheduled
        );
        if let Some(error) = &device.error {
            println!("          error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questsync_engine::SyncError;

    fn options(devices: usize, edits: usize, fail_writes: usize) -> SimulateOptions {
        SimulateOptions {
            devices,
            edits,
            debounce: Duration::from_millis(20),
            fail_writes,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn devices_converge() {
        let report = simulate(&options(3, 6, 0)).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.devices.len(), 3);
        // One seed write plus one per edit.
        assert_eq!(report.writes, 7);
        assert_eq!(report.attempts, report.writes);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_retried() {
        let report = simulate(&options(2, 2, 2)).await.unwrap();
        assert!(report.converged);
        assert_eq!(report.attempts, report.writes + 2);
        assert!(report.devices.iter().map(|d| d.retries_scheduled).sum::<u64>() >= 2);
    }

    #[test]
    fn device_needs_a_runtime() {
        let store = MemoryDocumentStore::new();
        let err = SimDevice::new(&store, SyncConfig::default()).err();
        assert!(matches!(err, Some(CliError::Sync(SyncError::NoRuntime))));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_devices_is_rejected() {
        assert!(simulate(&options(0, 1, 0)).await.is_err());
    }
}
