//! The sync engine.
//!
//! One engine keeps one user's local state in step with their remote
//! document:
//!
//! - identity changes open and close the remote subscription
//! - remote snapshots pass the reset-epoch guard and reach the application
//!   through a [`RemoteApplier`]
//! - local changes are debounced into a single merge write, skipped when
//!   the state's fingerprint has not changed since the last sync
//! - failed writes are retried with exponential backoff on a timer that is
//!   independent of the debounce timer
//!
//! All engine state sits behind one mutex. The mutex is never held across
//! an `.await` or while calling back into the application, the store or the
//! status subscribers.

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::error::{AuthError, SyncError, SyncResult};
use crate::identity::{IdentityProvider, UserInfo};
use crate::status::{StatusBus, SyncState, SyncStatus};
use crate::store::{DocPath, DocumentStore, SetOptions};
use crate::subscription::Subscription;
use parking_lot::Mutex;
use questsync_codec::{
    check_reset_epoch, EpochVerdict, Fingerprint, SnapshotCodec, Value, WireDocument,
    UPDATED_AT_FIELD,
};
use questsync_storage::LocalMarkers;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Supplies the application's full local state at push time.
pub trait LocalSnapshotSource: Send + Sync {
    /// Returns the current local state as a map.
    fn snapshot(&self) -> Value;
}

impl<F> LocalSnapshotSource for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn snapshot(&self) -> Value {
        self()
    }
}

/// Receives accepted remote snapshots.
///
/// Called synchronously. Local change notifications raised while this runs
/// are ignored, since they only echo the snapshot being applied.
pub trait RemoteApplier: Send + Sync {
    /// Replaces local state with `state`.
    fn apply_remote(&self, state: &Value);
}

impl<F> RemoteApplier for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn apply_remote(&self, state: &Value) {
        self(state)
    }
}

/// Why a push did not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sync is disabled.
    Disabled,
    /// The engine was disposed.
    Disposed,
    /// Nobody is signed in.
    SignedOut,
    /// No snapshot getter is registered, or it was dropped.
    NoSnapshotSource,
    /// The state matches the last synced fingerprint.
    Unchanged,
    /// Another write is in flight; this push will be retried after it.
    InFlight,
    /// A remote snapshot is being applied; this push will be retried after.
    ApplyingRemote,
    /// The user changed while the push was pending.
    SessionChanged,
}

/// Result of a push attempt.
#[derive(Debug)]
pub enum PushOutcome {
    /// The state was written.
    Written(Fingerprint),
    /// Nothing was written.
    Skipped(SkipReason),
    /// The write failed. `retry_in` is set when a retry was scheduled.
    Failed {
        /// The failure.
        error: SyncError,
        /// Delay before the scheduled retry.
        retry_in: Option<Duration>,
    },
    /// The local state cannot be uploaded.
    Rejected(String),
}

impl PushOutcome {
    /// Returns true if the state was written.
    pub fn is_written(&self) -> bool {
        matches!(self, PushOutcome::Written(_))
    }

    /// The retry delay, if the push failed and a retry was scheduled.
    pub fn retry_in(&self) -> Option<Duration> {
        match self {
            PushOutcome::Failed { retry_in, .. } => *retry_in,
            _ => None,
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Writes that reached the store.
    pub pushes_written: u64,
    /// Pushes skipped because the state was unchanged.
    pub pushes_skipped: u64,
    /// Writes the store rejected.
    pub push_failures: u64,
    /// Backoff retries scheduled.
    pub retries_scheduled: u64,
    /// Remote snapshots handed to the applier.
    pub snapshots_applied: u64,
    /// Snapshots recognized as echoes of known state.
    pub echoes_ignored: u64,
    /// Snapshots dropped by the reset-epoch guard.
    pub stale_rejected: u64,
    /// Snapshots that could not be decoded.
    pub decode_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Debounce,
    Retry,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct EngineState {
    initialized: bool,
    disabled: bool,
    disposed: bool,
    runtime: Option<Handle>,
    identity_sub: Option<Subscription>,
    remote_sub: Option<Subscription>,
    /// Bumped on every identity change; work tagged with an older value is
    /// discarded.
    generation: u64,
    user: Option<UserInfo>,
    path: Option<DocPath>,
    getter: Option<Weak<dyn LocalSnapshotSource>>,
    applier: Option<Arc<dyn RemoteApplier>>,
    debounce: Option<Timer>,
    retry: Option<Timer>,
    next_timer: u64,
    backoff: Option<Backoff>,
    last_synced: Option<Fingerprint>,
    in_flight: Option<Fingerprint>,
    push_in_flight: bool,
    push_requested: bool,
    stats: SyncStats,
}

impl EngineState {
    fn uid(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.uid.as_str())
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.debounce.take() {
            timer.cancel();
        }
        if let Some(timer) = self.retry.take() {
            timer.cancel();
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Timer> {
        match kind {
            TimerKind::Debounce => &mut self.debounce,
            TimerKind::Retry => &mut self.retry,
        }
    }
}

/// Keeps local application state and a per-user remote document in sync.
///
/// Construct with [`SyncEngine::new`], then call [`SyncEngine::init`] from
/// inside a tokio runtime. The engine is shared behind an `Arc`; timers and
/// store callbacks hold only weak references to it.
///
/// # Example
///
/// ```rust
/// use questsync_engine::{MemoryDocumentStore, MockIdentityProvider, SyncConfig, SyncEngine, UserInfo};
/// use questsync_storage::{InMemoryStore, LocalMarkers};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(MemoryDocumentStore::new());
/// let identity = Arc::new(MockIdentityProvider::new(UserInfo::new("u1")));
/// let markers = LocalMarkers::new(Arc::new(InMemoryStore::new()));
///
/// let engine = SyncEngine::new(SyncConfig::default(), store, identity, markers);
/// engine.init().unwrap();
/// engine.sign_in().await.unwrap();
/// assert_eq!(engine.get_user().unwrap().uid, "u1");
/// # }
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    markers: LocalMarkers,
    codec: SnapshotCodec,
    bus: StatusBus,
    applying_remote: AtomicBool,
    state: Mutex<EngineState>,
    this: Weak<SyncEngine>,
}

impl SyncEngine {
    /// Creates an engine. Starts `disabled` when either collaborator is not
    /// configured, `idle` otherwise.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        markers: LocalMarkers,
    ) -> Arc<Self> {
        let disabled = !store.is_configured() || !identity.is_configured();
        let initial = if disabled {
            SyncStatus::with_state(SyncState::Disabled)
        } else {
            SyncStatus::idle()
        };

        Arc::new_cyclic(|this| Self {
            config,
            store,
            identity,
            markers,
            codec: SnapshotCodec::new(),
            bus: StatusBus::new(initial),
            applying_remote: AtomicBool::new(false),
            state: Mutex::new(EngineState {
                disabled,
                ..EngineState::default()
            }),
            this: this.clone(),
        })
    }

    /// Wires identity changes. Later calls have no effect.
    ///
    /// Must be called from within a tokio runtime; its handle drives the
    /// debounce and retry timers.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a runtime and
    /// [`SyncError::Disposed`] after [`SyncEngine::dispose`].
    pub fn init(&self) -> SyncResult<()> {
        {
            let mut st = self.state.lock();
            if st.disposed {
                return Err(SyncError::Disposed);
            }
            if st.initialized {
                return Ok(());
            }
            st.initialized = true;
            if st.disabled {
                info!("sync disabled: store or identity provider not configured");
                return Ok(());
            }
            match Handle::try_current() {
                Ok(handle) => st.runtime = Some(handle),
                Err(_) => {
                    st.initialized = false;
                    return Err(SyncError::NoRuntime);
                }
            }
        }

        self.set_state(SyncState::Initializing);

        let weak = self.this.clone();
        let sub = self.identity.on_identity_change(Arc::new(move |user| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_identity(user);
            }
        }));

        let mut st = self.state.lock();
        if st.disposed {
            drop(st);
            sub.unsubscribe();
        } else {
            st.identity_sub = Some(sub);
        }
        Ok(())
    }

    /// Whether `init()` has run.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Stops all sync activity: unsubscribes from identity and remote
    /// changes and cancels timers. The engine cannot be restarted.
    pub fn dispose(&self) {
        let (identity_sub, remote_sub) = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            st.generation += 1;
            st.cancel_timers();
            st.getter = None;
            st.applier = None;
            (st.identity_sub.take(), st.remote_sub.take())
        };
        drop(identity_sub);
        drop(remote_sub);
        debug!("sync engine disposed");
    }

    /// Subscribes to status changes. The callback runs once immediately.
    pub fn on_status(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) -> Subscription {
        self.bus.status.subscribe(callback)
    }

    /// The current status.
    pub fn get_status(&self) -> SyncStatus {
        self.bus.status.current()
    }

    /// Subscribes to user changes. The callback runs once immediately.
    pub fn on_user(
        &self,
        callback: impl Fn(&Option<UserInfo>) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.user.subscribe(callback)
    }

    /// The signed-in user.
    pub fn get_user(&self) -> Option<UserInfo> {
        self.bus.user.current()
    }

    /// Counters since construction.
    pub fn stats(&self) -> SyncStats {
        self.state.lock().stats.clone()
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Registers the local state getter. The engine keeps a weak reference;
    /// the caller owns the getter. The most recent registration wins.
    pub fn set_local_snapshot_getter(&self, source: &Arc<dyn LocalSnapshotSource>) {
        self.state.lock().getter = Some(Arc::downgrade(source));
    }

    /// Registers the consumer of accepted remote snapshots, replacing any
    /// previous one.
    pub fn set_remote_applier(&self, applier: Arc<dyn RemoteApplier>) {
        self.state.lock().applier = Some(applier);
    }

    /// Signs in, using a redirect where popups are unreliable and falling
    /// back to a redirect when the popup is blocked.
    ///
    /// Failures are also published as an error status.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConfigured`] when sync is disabled and
    /// [`SyncError::Auth`] when the provider fails.
    pub async fn sign_in(&self) -> SyncResult<()> {
        if self.is_disabled() {
            return Err(SyncError::NotConfigured);
        }
        self.begin(SyncState::SigningIn);

        let result = if self.config.environment.prefers_redirect() {
            debug!("using redirect sign-in");
            self.identity.sign_in_redirect().await
        } else {
            match self.identity.sign_in_interactive().await {
                Err(AuthError::PopupBlocked) => {
                    info!("sign-in popup blocked, falling back to redirect");
                    self.identity.sign_in_redirect().await
                }
                other => other,
            }
        };

        match result {
            Ok(()) => {
                self.transition(SyncState::SigningIn, SyncState::Idle);
                Ok(())
            }
            Err(err) => {
                let err = SyncError::Auth(err);
                warn!(error = %err, "sign-in failed");
                self.set_error(&err);
                Err(err)
            }
        }
    }

    /// Flushes a pending push or retry, then signs out.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Auth`] when the provider fails; the failure is
    /// also published as an error status.
    pub async fn sign_out_now(&self) -> SyncResult<()> {
        if self.is_disabled() {
            return Ok(());
        }

        let pending = {
            let st = self.state.lock();
            st.debounce.is_some() || st.retry.is_some()
        };
        if pending {
            let outcome = self.flush_now().await;
            debug!(?outcome, "flushed before sign-out");
        }

        self.begin(SyncState::SigningOut);
        match self.identity.sign_out().await {
            Ok(()) => {
                self.transition(SyncState::SigningOut, SyncState::Idle);
                Ok(())
            }
            Err(err) => {
                let err = SyncError::Auth(err);
                warn!(error = %err, "sign-out failed");
                self.set_error(&err);
                Err(err)
            }
        }
    }

    /// Cancels the pending debounce and retry timers and pushes now.
    pub async fn flush_now(&self) -> PushOutcome {
        let generation = {
            let mut st = self.state.lock();
            st.cancel_timers();
            st.generation
        };
        self.push(generation).await
    }

    /// Schedules a debounced push after a local edit.
    ///
    /// Ignored while a remote snapshot is being applied. A pending backoff
    /// retry is superseded by the new schedule.
    pub fn notify_local_change(&self) {
        if self.applying_remote.load(Ordering::SeqCst) {
            debug!("ignoring local change raised by remote apply");
            return;
        }

        let mut st = self.state.lock();
        if st.disabled || st.disposed || st.user.is_none() {
            return;
        }
        if st.push_in_flight {
            st.push_requested = true;
            return;
        }
        self.schedule(&mut st, TimerKind::Debounce, self.config.debounce);
    }

    /// Reads the user's document once and applies it like a snapshot
    /// notification.
    ///
    /// # Errors
    ///
    /// Returns an error when sync is disabled, nobody is signed in, or the
    /// read fails. Read failures are also published as an error status.
    pub async fn pull_now(&self) -> SyncResult<()> {
        let (generation, path) = {
            let st = self.state.lock();
            if st.disposed {
                return Err(SyncError::Disposed);
            }
            if st.disabled {
                return Err(SyncError::NotConfigured);
            }
            match &st.path {
                Some(path) => (st.generation, path.clone()),
                None => return Err(SyncError::SignedOut),
            }
        };

        self.begin(SyncState::Pulling);
        match self.store.get(&path).await {
            Ok(doc) => {
                let abandoned = {
                    let st = self.state.lock();
                    st.generation != generation && (st.disposed || st.path.is_none())
                };
                if abandoned {
                    // No session is left to settle the status.
                    debug!("discarding pull result from previous session");
                    self.transition(SyncState::Pulling, SyncState::Idle);
                    return Ok(());
                }
                self.handle_snapshot(generation, doc);
                Ok(())
            }
            Err(err) => {
                let err = SyncError::Store(err);
                warn!(error = %err, "pull failed");
                self.set_error(&err);
                Err(err)
            }
        }
    }

    /// Records a local factory reset for the signed-in user.
    ///
    /// Bumps the user's reset epoch so remote documents written before the
    /// reset are ignored, then pushes the (reset) local state immediately so
    /// the remote copy is superseded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SignedOut`] when nobody is signed in and
    /// [`SyncError::Storage`] when the marker cannot be written.
    pub async fn mark_local_reset(&self) -> SyncResult<PushOutcome> {
        let uid = {
            let st = self.state.lock();
            if st.disposed {
                return Err(SyncError::Disposed);
            }
            st.uid().map(str::to_string).ok_or(SyncError::SignedOut)?
        };

        let epoch = self.markers.bump_reset_epoch(&uid)?;
        info!(uid = %uid, epoch, "local reset recorded");
        self.state.lock().last_synced = None;
        Ok(self.flush_now().await)
    }

    fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    fn set_state(&self, state: SyncState) {
        self.bus.status.modify(|s| s.state = state);
    }

    /// Enters `state` and clears the previous error.
    fn begin(&self, state: SyncState) {
        self.bus.status.modify(|s| {
            s.state = state;
            s.error = None;
        });
    }

    /// Moves to `to` only if the status is still `from`. Reaching `Idle`
    /// clears the error.
    fn transition(&self, from: SyncState, to: SyncState) {
        self.bus.status.modify(|s| {
            if s.state == from {
                s.state = to;
                if to == SyncState::Idle {
                    s.error = None;
                }
            }
        });
    }

    fn set_error(&self, err: &SyncError) {
        let message = err.to_string();
        self.bus.status.modify(|s| {
            s.state = SyncState::Error;
            s.error = Some(message);
        });
    }

    fn set_synced(&self) {
        let now = SystemTime::now();
        self.bus.status.modify(|s| {
            s.state = SyncState::Idle;
            s.error = None;
            s.advance_last_sync(now);
        });
    }

    fn schedule(&self, st: &mut EngineState, kind: TimerKind, delay: Duration) {
        // A fresh edit supersedes a pending retry.
        if kind == TimerKind::Debounce {
            if let Some(timer) = st.retry.take() {
                timer.cancel();
            }
        }
        if let Some(timer) = st.slot(kind).take() {
            timer.cancel();
        }
        let Some(runtime) = st.runtime.clone() else {
            return;
        };

        let id = st.next_timer;
        st.next_timer += 1;
        let generation = st.generation;
        let weak = self.this.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.fire(kind, id, generation).await;
            }
        });
        *st.slot(kind) = Some(Timer { id, handle });
    }

    async fn fire(&self, kind: TimerKind, id: u64, generation: u64) {
        {
            let mut st = self.state.lock();
            let slot = st.slot(kind);
            if slot.as_ref().map(|t| t.id) != Some(id) {
                return;
            }
            // Detach our own handle so nothing can abort the write below.
            *slot = None;
        }
        let outcome = self.push(generation).await;
        debug!(?kind, ?outcome, "timer push finished");
    }

    async fn push(&self, generation: u64) -> PushOutcome {
        let (uid, path, getter) = {
            let mut st = self.state.lock();
            if st.disposed {
                return PushOutcome::Skipped(SkipReason::Disposed);
            }
            if st.disabled {
                return PushOutcome::Skipped(SkipReason::Disabled);
            }
            if st.generation != generation {
                return PushOutcome::Skipped(SkipReason::SessionChanged);
            }
            let (Some(uid), Some(path)) = (st.uid().map(str::to_string), st.path.clone()) else {
                return PushOutcome::Skipped(SkipReason::SignedOut);
            };
            if st.push_in_flight {
                st.push_requested = true;
                return PushOutcome::Skipped(SkipReason::InFlight);
            }
            if self.applying_remote.load(Ordering::SeqCst) {
                self.schedule(&mut st, TimerKind::Debounce, self.config.debounce);
                return PushOutcome::Skipped(SkipReason::ApplyingRemote);
            }
            let Some(getter) = st.getter.as_ref().and_then(Weak::upgrade) else {
                return PushOutcome::Skipped(SkipReason::NoSnapshotSource);
            };
            (uid, path, getter)
        };

        let local = getter.snapshot();
        let epoch = match self.markers.reset_epoch(&uid) {
            Ok(epoch) => epoch,
            Err(err) => {
                let err = SyncError::Storage(err);
                self.set_error(&err);
                return PushOutcome::Failed {
                    error: err,
                    retry_in: None,
                };
            }
        };
        let encoded = self
            .codec
            .encode(&local, epoch)
            .and_then(|wire| self.codec.fingerprint(&local).map(|fp| (wire, fp)));
        let (wire, fingerprint) = match encoded {
            Ok(encoded) => encoded,
            Err(err) => {
                let err = SyncError::Codec(err);
                warn!(error = %err, "local state rejected");
                self.set_error(&err);
                return PushOutcome::Rejected(err.to_string());
            }
        };

        {
            let mut st = self.state.lock();
            if st.generation != generation {
                return PushOutcome::Skipped(SkipReason::SessionChanged);
            }
            if st.push_in_flight {
                st.push_requested = true;
                return PushOutcome::Skipped(SkipReason::InFlight);
            }
            if st.last_synced == Some(fingerprint) {
                st.stats.pushes_skipped += 1;
                debug!(fingerprint = %fingerprint.short(), "state unchanged, push skipped");
                return PushOutcome::Skipped(SkipReason::Unchanged);
            }
            st.push_in_flight = true;
            st.in_flight = Some(fingerprint);
        }

        self.set_state(SyncState::Pushing);
        let options = SetOptions::merge().with_server_timestamp(UPDATED_AT_FIELD);
        let result = self.store.set(&path, wire.into_value(), options).await;

        let mut st = self.state.lock();
        if st.generation != generation {
            debug!(%path, "discarding push result from previous session");
            return match result {
                Ok(()) => PushOutcome::Written(fingerprint),
                Err(err) => PushOutcome::Failed {
                    error: err.into(),
                    retry_in: None,
                },
            };
        }
        st.push_in_flight = false;
        st.in_flight = None;
        let requested = std::mem::take(&mut st.push_requested);

        match result {
            Ok(()) => {
                st.last_synced = Some(fingerprint);
                if let Some(backoff) = st.backoff.as_mut() {
                    backoff.reset();
                }
                st.stats.pushes_written += 1;
                if requested {
                    self.schedule(&mut st, TimerKind::Debounce, self.config.debounce);
                }
                drop(st);
                debug!(%path, fingerprint = %fingerprint.short(), "push written");
                self.set_synced();
                PushOutcome::Written(fingerprint)
            }
            Err(err) => {
                let error = SyncError::from(err);
                st.stats.push_failures += 1;
                let mut retry_in = None;
                if requested {
                    self.schedule(&mut st, TimerKind::Debounce, self.config.debounce);
                } else if error.is_retryable() {
                    let policy = self.config.backoff;
                    retry_in = st
                        .backoff
                        .get_or_insert_with(|| Backoff::new(policy))
                        .next();
                    if let Some(delay) = retry_in {
                        st.stats.retries_scheduled += 1;
                        self.schedule(&mut st, TimerKind::Retry, delay);
                    }
                }
                drop(st);
                warn!(%path, error = %error, ?retry_in, "push failed");
                self.set_error(&error);
                PushOutcome::Failed { error, retry_in }
            }
        }
    }

    fn handle_identity(&self, user: Option<UserInfo>) {
        let old_sub = {
            let mut st = self.state.lock();
            if st.disposed || st.disabled {
                return;
            }
            let same_uid = st.uid() == user.as_ref().map(|u| u.uid.as_str());
            if same_uid && user.is_some() {
                st.user = user.clone();
                drop(st);
                self.bus.user.publish(user);
                return;
            }

            st.generation += 1;
            st.cancel_timers();
            if let Some(backoff) = st.backoff.as_mut() {
                backoff.reset();
            }
            st.last_synced = None;
            st.in_flight = None;
            st.push_in_flight = false;
            st.push_requested = false;
            st.user = user.clone();
            st.path = user
                .as_ref()
                .map(|u| self.config.document_path.resolve(&u.uid));
            st.remote_sub.take()
        };
        drop(old_sub);
        self.bus.user.publish(user.clone());

        let Some(user) = user else {
            info!("signed out");
            self.set_state(SyncState::Idle);
            return;
        };

        info!(uid = %user.uid, "signed in");
        match self.markers.last_uid() {
            Ok(last) if last.as_deref() == Some(user.uid.as_str()) => {}
            Ok(_) => {
                if let Err(err) = self.markers.set_last_uid(&user.uid) {
                    warn!(error = %err, "failed to persist last uid");
                }
            }
            Err(err) => warn!(error = %err, "failed to read last uid"),
        }

        let (generation, path) = {
            let st = self.state.lock();
            match &st.path {
                Some(path) => (st.generation, path.clone()),
                None => return,
            }
        };
        self.set_state(SyncState::Pulling);

        let weak = self.this.clone();
        let sub = self.store.subscribe(
            &path,
            Arc::new(move |doc| {
                if let Some(engine) = weak.upgrade() {
                    engine.handle_snapshot(generation, doc);
                }
            }),
        );

        let mut st = self.state.lock();
        if st.generation == generation && !st.disposed {
            st.remote_sub = Some(sub);
        } else {
            drop(st);
            sub.unsubscribe();
        }
    }

    fn handle_snapshot(&self, generation: u64, doc: Option<Value>) {
        let uid = {
            let st = self.state.lock();
            if st.disposed || st.generation != generation {
                debug!("discarding snapshot for previous session");
                return;
            }
            match st.uid() {
                Some(uid) => uid.to_string(),
                None => return,
            }
        };

        let Some(doc) = doc else {
            // No remote state yet; seed it from this device.
            debug!(uid = %uid, "no remote document");
            let mut st = self.state.lock();
            if !st.push_in_flight {
                self.schedule(&mut st, TimerKind::Debounce, self.config.debounce);
            }
            drop(st);
            self.transition(SyncState::Pulling, SyncState::Idle);
            return;
        };

        let wire = match WireDocument::from_value(doc) {
            Ok(wire) => wire,
            Err(err) => {
                self.state.lock().stats.decode_failures += 1;
                let err = SyncError::Decode(err);
                warn!(uid = %uid, error = %err, "dropping undecodable snapshot");
                self.set_error(&err);
                return;
            }
        };

        let local_epoch = match self.markers.reset_epoch(&uid) {
            Ok(epoch) => epoch,
            Err(err) => {
                let err = SyncError::Storage(err);
                self.set_error(&err);
                return;
            }
        };
        match check_reset_epoch(wire.reset_epoch, local_epoch) {
            EpochVerdict::Accept => {}
            EpochVerdict::Adopt(epoch) => {
                info!(uid = %uid, epoch, "adopting remote reset epoch");
                if let Err(err) = self.markers.set_reset_epoch(&uid, epoch) {
                    warn!(error = %err, "failed to persist reset epoch");
                }
            }
            EpochVerdict::Stale { remote, local } => {
                self.state.lock().stats.stale_rejected += 1;
                info!(uid = %uid, remote, local, "ignoring snapshot older than local reset");
                self.transition(SyncState::Pulling, SyncState::Idle);
                return;
            }
        }

        let local = self.codec.decode(&wire);
        let fingerprint = match self.codec.fingerprint(&local) {
            Ok(fp) => fp,
            Err(err) => {
                self.state.lock().stats.decode_failures += 1;
                self.set_error(&SyncError::Decode(err));
                return;
            }
        };

        let applier = {
            let mut st = self.state.lock();
            if st.generation != generation {
                return;
            }
            if st.last_synced == Some(fingerprint) || st.in_flight == Some(fingerprint) {
                st.stats.echoes_ignored += 1;
                drop(st);
                debug!(fingerprint = %fingerprint.short(), "echo ignored");
                self.transition(SyncState::Pulling, SyncState::Idle);
                return;
            }
            let Some(applier) = st.applier.clone() else {
                drop(st);
                debug!("no remote applier registered, snapshot not applied");
                self.transition(SyncState::Pulling, SyncState::Idle);
                return;
            };
            // Remote wins over edits that have not been pushed yet.
            st.cancel_timers();
            st.last_synced = Some(fingerprint);
            st.stats.snapshots_applied += 1;
            applier
        };

        self.set_state(SyncState::Applying);
        self.applying_remote.store(true, Ordering::SeqCst);
        let applied = catch_unwind(AssertUnwindSafe(|| applier.apply_remote(&local)));
        self.applying_remote.store(false, Ordering::SeqCst);

        if applied.is_err() {
            warn!(uid = %uid, "remote applier panicked");
            self.state.lock().last_synced = None;
            self.bus.status.modify(|s| {
                s.state = SyncState::Error;
                s.error = Some("applying remote snapshot failed".to_string());
            });
            return;
        }

        debug!(uid = %uid, fingerprint = %fingerprint.short(), "remote snapshot applied");
        self.set_synced();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.state.get_mut().cancel_timers();
    }
}
