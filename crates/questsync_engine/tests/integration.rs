//! Integration tests for the sync engine against in-memory collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use questsync_codec::{SnapshotCodec, Value, WireDocument, RESET_EPOCH_FIELD};
use questsync_engine::{
    AuthError, BackoffPolicy, DocPath, DocumentStore, LocalSnapshotSource, MemoryDocumentStore,
    MockIdentityProvider, PushOutcome, RemoteApplier, SetOptions, SignInEnvironment,
    SignInMethod, SkipReason, SnapshotListener, StoreError, Subscription, SyncConfig, SyncEngine,
    SyncError, SyncState, UserInfo,
};
use questsync_storage::{InMemoryStore, LocalMarkers};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

const DEBOUNCE: Duration = Duration::from_millis(800);

fn path(uid: &str) -> DocPath {
    DocPath::new(format!("users/{uid}/app/state"))
}

fn app_state(xp: i64) -> Value {
    Value::map([("tasks", Value::Array(vec![])), ("xp", Value::Integer(xp))])
}

fn remote_doc(state: &Value, epoch: i64) -> Value {
    SnapshotCodec::new().encode(state, epoch).unwrap().into_value()
}

/// One device: an engine plus the application state it syncs.
struct Harness {
    engine: Arc<SyncEngine>,
    store: MemoryDocumentStore,
    identity: MockIdentityProvider,
    markers: LocalMarkers,
    local: Arc<Mutex<Value>>,
    applied: Arc<Mutex<Vec<Value>>>,
    _getter: Arc<dyn LocalSnapshotSource>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    fn with_config(config: SyncConfig) -> Self {
        let store = MemoryDocumentStore::new();
        Self::build(config, Arc::new(store.clone()), store)
    }

    fn build(config: SyncConfig, backend: Arc<dyn DocumentStore>, store: MemoryDocumentStore) -> Self {
        let identity = MockIdentityProvider::new(UserInfo::new("u1"));
        let markers = LocalMarkers::new(Arc::new(InMemoryStore::new()));
        let engine = SyncEngine::new(config, backend, Arc::new(identity.clone()), markers.clone());

        let local = Arc::new(Mutex::new(Value::empty_map()));
        let applied = Arc::new(Mutex::new(Vec::new()));

        let source = Arc::clone(&local);
        let getter: Arc<dyn LocalSnapshotSource> = Arc::new(move || source.lock().clone());
        engine.set_local_snapshot_getter(&getter);

        // Like a UI state setter: replacing local state raises a change
        // notification, which the engine must treat as an echo.
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
        engine.init().unwrap();

        Self {
            engine,
            store,
            identity,
            markers,
            local,
            applied,
            _getter: getter,
        }
    }

    fn edit(&self, state: Value) {
        *self.local.lock() = state;
        self.engine.notify_local_change();
    }

    fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }
}

#[tokio::test(start_paused = true)]
async fn first_push_and_its_echo() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    assert_eq!(h.markers.last_uid().unwrap().as_deref(), Some("u1"));

    h.edit(app_state(0));
    sleep(DEBOUNCE + Duration::from_millis(100)).await;

    assert_eq!(h.store.writes_to(&path("u1")), 1);
    let write = h.store.writes().remove(0);
    assert_eq!(write.value.get("xp"), Some(&Value::Integer(0)));
    assert_eq!(write.value.get(RESET_EPOCH_FIELD), Some(&Value::Integer(0)));
    assert!(write.options.merge);

    // The store echoed the write straight back; it decodes to the pushed
    // state and is not applied.
    let stored = h.store.document(&path("u1")).unwrap();
    let wire = WireDocument::from_value(stored.clone()).unwrap();
    assert_eq!(SnapshotCodec::new().decode(&wire), app_state(0));
    assert_eq!(h.applied_count(), 0);
    assert_eq!(h.engine.stats().echoes_ignored, 1);

    // A redelivered echo changes nothing either.
    h.store.put_remote(&path("u1"), stored);
    sleep(DEBOUNCE * 3).await;
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.applied_count(), 0);

    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_sync_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn repeated_notifications_collapse() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();

    h.edit(app_state(1));
    h.engine.notify_local_change();
    sleep(DEBOUNCE * 2).await;
    assert_eq!(h.store.write_count(), 1);

    // Unchanged state: the debounced push is a no-op.
    h.engine.notify_local_change();
    sleep(DEBOUNCE * 2).await;
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.engine.stats().pushes_skipped, 1);

    assert!(matches!(
        h.engine.flush_now().await,
        PushOutcome::Skipped(SkipReason::Unchanged)
    ));
    assert_eq!(h.store.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn applying_remote_does_not_push_back() {
    let h = Harness::new();
    h.store.put_remote(&path("u1"), remote_doc(&app_state(42), 0));

    h.engine.sign_in().await.unwrap();
    assert_eq!(h.applied_count(), 1);
    assert_eq!(*h.local.lock(), app_state(42));

    sleep(DEBOUNCE * 3).await;
    assert_eq!(h.store.write_count(), 0);

    // Even an explicit flush sees the applied state as already synced.
    assert!(matches!(
        h.engine.flush_now().await,
        PushOutcome::Skipped(SkipReason::Unchanged)
    ));
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.engine.stats().snapshots_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn remote_wins_over_pending_edit() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();

    h.edit(app_state(5));
    h.store.put_remote(&path("u1"), remote_doc(&app_state(9), 0));

    sleep(DEBOUNCE * 2).await;
    assert_eq!(*h.local.lock(), app_state(9));
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_snapshots_are_rejected() {
    let h = Harness::new();
    h.markers.set_reset_epoch("u1", 2).unwrap();
    h.engine.sign_in().await.unwrap();

    h.store.put_remote(&path("u1"), remote_doc(&app_state(1), 1));
    assert_eq!(h.applied_count(), 0);
    assert_eq!(h.engine.stats().stale_rejected, 1);
    assert_eq!(h.markers.reset_epoch("u1").unwrap(), 2);

    // Documents without an epoch predate any reset.
    h.store
        .put_remote(&path("u1"), Value::map([("xp", Value::Integer(8))]));
    assert_eq!(h.applied_count(), 0);

    h.store.put_remote(&path("u1"), remote_doc(&app_state(3), 3));
    assert_eq!(h.applied_count(), 1);
    assert_eq!(*h.local.lock(), app_state(3));
    assert_eq!(h.markers.reset_epoch("u1").unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_and_resets() {
    let h = Harness::with_config(
        SyncConfig::default().with_backoff(BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
        )),
    );
    h.engine.sign_in().await.unwrap();
    h.edit(app_state(1));
    h.store
        .fail_next_writes(StoreError::Unavailable("offline".into()), 3);

    let mut delays = Vec::new();
    for _ in 0..3 {
        let outcome = h.engine.flush_now().await;
        assert!(matches!(
            &outcome,
            PushOutcome::Failed {
                error: SyncError::TransientWrite(_),
                ..
            }
        ));
        delays.push(outcome.retry_in().unwrap());
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.error.unwrap().contains("offline"));

    assert!(h.engine.flush_now().await.is_written());
    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.error, None);

    h.store
        .fail_next_writes(StoreError::QuotaExceeded("writes".into()), 1);
    h.edit(app_state(2));
    assert_eq!(
        h.engine.flush_now().await.retry_in(),
        Some(Duration::from_secs(1))
    );
}

#[tokio::test(start_paused = true)]
async fn retries_fire_on_schedule() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    h.store
        .fail_next_writes(StoreError::Unavailable("offline".into()), 3);
    h.edit(app_state(1));

    // Debounce at 0.8s, then retries 1s, 2s and 4s after each failure.
    sleep(Duration::from_millis(850)).await;
    assert_eq!(h.store.attempt_count(), 1);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(h.store.attempt_count(), 2);
    sleep(Duration::from_millis(2000)).await;
    assert_eq!(h.store.attempt_count(), 3);
    assert_eq!(h.store.write_count(), 0);
    sleep(Duration::from_millis(4000)).await;
    assert_eq!(h.store.attempt_count(), 4);
    assert_eq!(h.store.write_count(), 1);

    let stats = h.engine.stats();
    assert_eq!(stats.push_failures, 3);
    assert_eq!(stats.retries_scheduled, 3);
    assert_eq!(stats.pushes_written, 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_edit_supersedes_retry() {
    let h = Harness::with_config(
        SyncConfig::default().with_backoff(BackoffPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
        )),
    );
    h.engine.sign_in().await.unwrap();
    h.store
        .fail_next_writes(StoreError::Unavailable("offline".into()), 1);

    h.edit(app_state(1));
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(h.store.attempt_count(), 1);

    // The retry was due at 5.8s; the new edit pushes at 1.8s instead.
    h.edit(app_state(2));
    sleep(Duration::from_millis(900)).await;
    assert_eq!(h.store.attempt_count(), 2);
    assert_eq!(h.store.write_count(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.store.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_is_not_retried() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    h.store
        .fail_next_writes(StoreError::PermissionDenied("rules".into()), 1);
    h.edit(app_state(1));

    let outcome = h.engine.flush_now().await;
    assert!(matches!(
        outcome,
        PushOutcome::Failed {
            error: SyncError::Store(StoreError::PermissionDenied(_)),
            retry_in: None
        }
    ));
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.store.attempt_count(), 1);

    // The next local change tries again.
    h.edit(app_state(2));
    sleep(DEBOUNCE * 2).await;
    assert_eq!(h.store.write_count(), 1);
}

/// Delegates to a memory store but remembers every listener, so tests can
/// fire callbacks after the engine has unsubscribed.
struct LeakyStore {
    inner: MemoryDocumentStore,
    listeners: Mutex<Vec<(DocPath, SnapshotListener)>>,
}

#[async_trait]
impl DocumentStore for LeakyStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        self.inner.set(path, value, options).await
    }

    fn subscribe(&self, path: &DocPath, listener: SnapshotListener) -> Subscription {
        self.listeners
            .lock()
            .push((path.clone(), Arc::clone(&listener)));
        self.inner.subscribe(path, listener)
    }
}

#[tokio::test(start_paused = true)]
async fn identity_switch_discards_old_session() {
    let store = MemoryDocumentStore::new();
    let leaky = Arc::new(LeakyStore {
        inner: store.clone(),
        listeners: Mutex::new(Vec::new()),
    });
    let h = Harness::build(SyncConfig::default(), leaky.clone(), store);

    h.identity.emit(Some(UserInfo::new("a")));
    h.edit(app_state(1));

    h.identity.emit(Some(UserInfo::new("b")));
    assert_eq!(h.store.listener_count(&path("a")), 0);
    assert_eq!(h.store.listener_count(&path("b")), 1);

    sleep(DEBOUNCE * 3).await;
    assert_eq!(h.store.writes_to(&path("a")), 0);
    assert_eq!(h.store.writes_to(&path("b")), 1);

    // A late snapshot for `a` is ignored.
    let late_a = h
        .leaky_listener(&leaky, &path("a"))
        .expect("listener for a was registered");
    late_a(Some(remote_doc(&app_state(99), 0)));
    assert_eq!(h.applied_count(), 0);
    assert_eq!(*h.local.lock(), app_state(1));
    assert_eq!(h.engine.get_user().unwrap().uid, "b");
    assert_eq!(h.markers.last_uid().unwrap().as_deref(), Some("b"));
}

impl Harness {
    fn leaky_listener(&self, store: &LeakyStore, path: &DocPath) -> Option<SnapshotListener> {
        store
            .listeners
            .lock()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, l)| Arc::clone(l))
    }
}

#[tokio::test(start_paused = true)]
async fn same_uid_event_keeps_subscription() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    h.edit(app_state(4));

    h.identity
        .emit(Some(UserInfo::new("u1").with_display_name("Ada")));
    assert_eq!(
        h.engine.get_user().unwrap().display_name.as_deref(),
        Some("Ada")
    );
    assert_eq!(h.store.listener_count(&path("u1")), 1);

    // The pending push survived the refresh.
    sleep(DEBOUNCE * 2).await;
    assert_eq!(h.store.write_count(), 1);
}

/// Holds writes until permits are released.
struct GatedStore {
    inner: MemoryDocumentStore,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| StoreError::Other("gate closed".into()))?;
        self.inner.set(path, value, options).await
    }

    fn subscribe(&self, path: &DocPath, listener: SnapshotListener) -> Subscription {
        self.inner.subscribe(path, listener)
    }
}

#[tokio::test(start_paused = true)]
async fn edits_during_a_write_are_pushed_after_it() {
    let store = MemoryDocumentStore::new();
    let gate = Arc::new(Semaphore::new(0));
    let gated = Arc::new(GatedStore {
        inner: store.clone(),
        gate: Arc::clone(&gate),
    });
    let h = Harness::build(SyncConfig::default(), gated, store);
    h.engine.sign_in().await.unwrap();

    *h.local.lock() = app_state(1);
    let engine = Arc::clone(&h.engine);
    let first = tokio::spawn(async move { engine.flush_now().await });
    tokio::task::yield_now().await;
    assert_eq!(h.engine.get_status().state, SyncState::Pushing);

    h.edit(app_state(2));
    assert!(matches!(
        h.engine.flush_now().await,
        PushOutcome::Skipped(SkipReason::InFlight)
    ));

    gate.add_permits(10);
    assert!(first.await.unwrap().is_written());
    assert_eq!(h.store.write_count(), 1);

    sleep(DEBOUNCE * 2).await;
    let writes = h.store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].value.get("xp"), Some(&Value::Integer(2)));
}

#[tokio::test(start_paused = true)]
async fn sign_in_falls_back_to_redirect() {
    let h = Harness::new();
    h.identity.fail_interactive(AuthError::PopupBlocked);

    h.engine.sign_in().await.unwrap();
    assert_eq!(
        h.identity.calls(),
        vec![SignInMethod::Interactive, SignInMethod::Redirect]
    );
    assert_eq!(h.engine.get_user().unwrap().uid, "u1");
}

#[tokio::test(start_paused = true)]
async fn standalone_apps_use_redirect() {
    let h = Harness::with_config(
        SyncConfig::default().with_environment(SignInEnvironment::new().standalone()),
    );
    h.engine.sign_in().await.unwrap();
    assert_eq!(h.identity.calls(), vec![SignInMethod::Redirect]);
}

#[tokio::test(start_paused = true)]
async fn sign_in_failure_is_a_status() {
    let h = Harness::new();
    h.identity.fail_interactive(AuthError::Cancelled);

    let err = h.engine.sign_in().await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(AuthError::Cancelled)));

    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Error);
    assert_eq!(
        status.error.as_deref(),
        Some("authentication failed: sign-in was cancelled")
    );
    assert!(h.engine.get_user().is_none());

    // A later attempt clears the error.
    h.engine.sign_in().await.unwrap();
    assert_eq!(h.engine.get_status().error, None);
}

#[tokio::test(start_paused = true)]
async fn sign_out_flushes_pending_edit() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    h.edit(app_state(7));

    h.engine.sign_out_now().await.unwrap();
    assert_eq!(h.store.write_count(), 1);
    assert!(h.engine.get_user().is_none());
    assert_eq!(h.store.listener_count(&path("u1")), 0);
    assert_eq!(h.engine.get_status().state, SyncState::Idle);

    // Edits while signed out go nowhere.
    h.edit(app_state(8));
    sleep(DEBOUNCE * 2).await;
    assert_eq!(h.store.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn local_reset_supersedes_remote() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();
    h.edit(app_state(30));
    assert!(h.engine.flush_now().await.is_written());

    *h.local.lock() = app_state(0);
    let outcome = h.engine.mark_local_reset().await.unwrap();
    assert!(outcome.is_written());
    assert_eq!(h.markers.reset_epoch("u1").unwrap(), 1);

    let stored = h.store.document(&path("u1")).unwrap();
    assert_eq!(stored.get(RESET_EPOCH_FIELD), Some(&Value::Integer(1)));
    assert_eq!(stored.get("xp"), Some(&Value::Integer(0)));

    // Another device still on the old epoch writes its old state.
    h.store
        .put_remote(&path("u1"), remote_doc(&app_state(30), 0));
    assert_eq!(h.applied_count(), 0);
    assert_eq!(*h.local.lock(), app_state(0));
}

#[tokio::test(start_paused = true)]
async fn pull_now_routes_through_guards() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.pull_now().await,
        Err(SyncError::SignedOut)
    ));

    h.engine.sign_in().await.unwrap();
    h.store.put_remote(&path("u1"), remote_doc(&app_state(6), 0));
    assert_eq!(h.applied_count(), 1);

    h.engine.pull_now().await.unwrap();
    assert_eq!(h.applied_count(), 1);
    assert_eq!(h.engine.stats().echoes_ignored, 1);
    assert_eq!(h.engine.get_status().state, SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn malformed_document_keeps_subscription() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();

    h.store.put_remote(
        &path("u1"),
        Value::map([(RESET_EPOCH_FIELD, Value::from("two"))]),
    );
    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.error.unwrap().contains("malformed remote document"));
    assert_eq!(h.engine.stats().decode_failures, 1);

    h.store.put_remote(&path("u1"), remote_doc(&app_state(2), 0));
    assert_eq!(h.applied_count(), 1);
    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.error, None);
}

#[tokio::test(start_paused = true)]
async fn oversized_float_epoch_is_not_adopted() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();

    h.store.put_remote(
        &path("u1"),
        Value::map([
            ("xp", Value::Integer(1)),
            (RESET_EPOCH_FIELD, Value::Float(1e30)),
        ]),
    );
    assert_eq!(h.applied_count(), 0);
    assert_eq!(h.engine.stats().decode_failures, 1);
    assert_eq!(h.markers.reset_epoch("u1").unwrap(), 0);

    // A later local reset still moves the epoch forward.
    h.edit(app_state(0));
    h.engine.mark_local_reset().await.unwrap();
    assert_eq!(h.markers.reset_epoch("u1").unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn pull_now_clears_an_old_error() {
    let h = Harness::new();
    h.engine.sign_in().await.unwrap();

    h.store.put_remote(
        &path("u1"),
        Value::map([(RESET_EPOCH_FIELD, Value::from("two"))]),
    );
    assert_eq!(h.engine.get_status().state, SyncState::Error);

    // A stale document is dropped without touching the error.
    h.markers.set_reset_epoch("u1", 5).unwrap();
    h.store.put_remote(&path("u1"), remote_doc(&app_state(1), 0));
    assert_eq!(h.engine.stats().stale_rejected, 1);

    h.engine.pull_now().await.unwrap();
    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.error, None);
    assert_eq!(h.engine.stats().stale_rejected, 2);
    assert_eq!(h.applied_count(), 0);
}

/// Holds every read until a permit is released.
struct GatedReadStore {
    inner: MemoryDocumentStore,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl DocumentStore for GatedReadStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| StoreError::Other("gate closed".into()))?;
        self.inner.get(path).await
    }

    async fn set(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        self.inner.set(path, value, options).await
    }

    fn subscribe(&self, path: &DocPath, listener: SnapshotListener) -> Subscription {
        self.inner.subscribe(path, listener)
    }
}

#[tokio::test(start_paused = true)]
async fn dispose_during_pull_settles_status() {
    let store = MemoryDocumentStore::new();
    let gate = Arc::new(Semaphore::new(0));
    let gated = Arc::new(GatedReadStore {
        inner: store.clone(),
        gate: Arc::clone(&gate),
    });
    let h = Harness::build(SyncConfig::default(), gated, store);
    h.engine.sign_in().await.unwrap();
    h.store.put_remote(&path("u1"), remote_doc(&app_state(3), 0));
    assert_eq!(h.applied_count(), 1);

    let engine = Arc::clone(&h.engine);
    let pull = tokio::spawn(async move { engine.pull_now().await });
    tokio::task::yield_now().await;
    assert_eq!(h.engine.get_status().state, SyncState::Pulling);

    h.engine.dispose();
    gate.add_permits(1);
    pull.await.unwrap().unwrap();

    let status = h.engine.get_status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(!status.state.is_busy());
    assert_eq!(h.applied_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unconfigured_store_is_inert() {
    let store = MemoryDocumentStore::unconfigured();
    let h = Harness::build(SyncConfig::default(), Arc::new(store.clone()), store);

    assert_eq!(h.engine.get_status().state, SyncState::Disabled);
    assert!(matches!(
        h.engine.sign_in().await,
        Err(SyncError::NotConfigured)
    ));
    h.edit(app_state(1));
    assert!(matches!(
        h.engine.flush_now().await,
        PushOutcome::Skipped(SkipReason::Disabled)
    ));
    assert_eq!(h.store.attempt_count(), 0);
    assert!(h.identity.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn status_subscribers_see_transitions() {
    let h = Harness::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _sub = h.engine.on_status(move |s| sink.lock().push(s.state));

    h.engine.sign_in().await.unwrap();
    h.edit(app_state(1));
    sleep(DEBOUNCE * 2).await;

    let seen = states.lock().clone();
    assert_eq!(seen.first(), Some(&SyncState::Idle));
    assert!(seen.contains(&SyncState::SigningIn));
    assert!(seen.contains(&SyncState::Pulling));
    assert!(seen.contains(&SyncState::Pushing));
    assert_eq!(seen.last(), Some(&SyncState::Idle));
}
