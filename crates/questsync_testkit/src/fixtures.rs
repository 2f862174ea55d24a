//! Test fixtures: devices and marker stores.

use parking_lot::Mutex;
use questsync_codec::Value;
use questsync_engine::{
    LocalSnapshotSource, MemoryDocumentStore, MockIdentityProvider, RemoteApplier, SyncConfig,
    SyncEngine, UserInfo,
};
use questsync_storage::{FileStore, InMemoryStore, LocalMarkers};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tempfile::TempDir;

/// One simulated device: an engine, its local state and its markers.
///
/// Remote snapshots replace the local state and raise a change
/// notification, the way a UI state setter would.
pub struct Device {
    /// The device's engine.
    pub engine: Arc<SyncEngine>,
    /// The device's identity provider.
    pub identity: MockIdentityProvider,
    /// The device's persisted markers.
    pub markers: LocalMarkers,
    local: Arc<Mutex<Value>>,
    applied: Arc<Mutex<Vec<Value>>>,
    _getter: Arc<dyn LocalSnapshotSource>,
}

impl Device {
    /// Creates a device for `uid` backed by `store`, with in-memory markers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(store: &MemoryDocumentStore, uid: &str, config: SyncConfig) -> Self {
        Self::with_markers(
            store,
            uid,
            config,
            LocalMarkers::new(Arc::new(InMemoryStore::new())),
        )
    }

    /// Creates a device with the given markers.
    pub fn with_markers(
        store: &MemoryDocumentStore,
        uid: &str,
        config: SyncConfig,
        markers: LocalMarkers,
    ) -> Self {
        let identity = MockIdentityProvider::new(UserInfo::new(uid));
        let engine = SyncEngine::new(
            config,
            Arc::new(store.clone()),
            Arc::new(identity.clone()),
            markers.clone(),
        );

        let local = Arc::new(Mutex::new(Value::empty_map()));
        let applied = Arc::new(Mutex::new(Vec::new()));

        let source = Arc::clone(&local);
        let getter: Arc<dyn LocalSnapshotSource> = Arc::new(move || source.lock().clone());
        engine.set_local_snapshot_getter(&getter);

        let sink = Arc::clone(&local);
        let log = Arc::clone(&applied);
        let weak: Weak<SyncEngine> = Arc::downgrade(&engine);
        let applier: Arc<dyn RemoteApplier> = Arc::new(move |state: &Value| {
            *sink.lock() = state.clone();
            log.lock().push(state.clone());
            if let Some(engine) = weak.upgrade() {
                engine.notify_local_change();
            }
        });
        engine.set_remote_applier(applier);
        engine.init().expect("Failed to start engine");

        Self {
            engine,
            identity,
            markers,
            local,
            applied,
            _getter: getter,
        }
    }

    /// Replaces the local state and notifies the engine.
    pub fn edit(&self, state: Value) {
        *self.local.lock() = state;
        self.engine.notify_local_change();
    }

    /// Replaces the local state without notifying the engine.
    pub fn set_state_silently(&self, state: Value) {
        *self.local.lock() = state;
    }

    /// The current local state.
    pub fn state(&self) -> Value {
        self.local.lock().clone()
    }

    /// Every remote snapshot applied so far.
    pub fn applied(&self) -> Vec<Value> {
        self.applied.lock().clone()
    }
}

/// A file-backed marker store in a temporary directory.
pub struct TempMarkers {
    /// The markers.
    pub markers: LocalMarkers,
    dir: TempDir,
}

impl TempMarkers {
    /// Creates an empty marker file.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(&dir.path().join("markers.log"))
            .expect("Failed to open marker store");
        Self {
            markers: LocalMarkers::new(Arc::new(store)),
            dir,
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("markers.log")
    }

    /// Reopens the marker file, as a restarted process would.
    pub fn reopen(&self) -> LocalMarkers {
        let store = FileStore::open(&self.path()).expect("Failed to reopen marker store");
        LocalMarkers::new(Arc::new(store))
    }
}

impl Default for TempMarkers {
    fn default() -> Self {
        Self::new()
    }
}
