//! Adapter between the engine and presentation code.

use crate::engine::{LocalSnapshotSource, RemoteApplier, SyncEngine};
use crate::error::SyncResult;
use crate::identity::UserInfo;
use crate::status::{Channel, SyncState};
use crate::subscription::Subscription;
use parking_lot::Mutex;
use std::sync::Arc;

/// A per-consumer view of a [`SyncEngine`].
///
/// Exposes the few fields a UI needs (`ready`, `user`, `busy`, `error`) and
/// the actions it triggers. UI frameworks that re-render on change can
/// register [`SyncBridge::on_change`]; it fires whenever the engine's status
/// or user changes.
pub struct SyncBridge {
    engine: Arc<SyncEngine>,
    getter: Mutex<Option<Arc<dyn LocalSnapshotSource>>>,
    revision: Arc<Channel<u64>>,
    _status_sub: Subscription,
    _user_sub: Subscription,
}

impl SyncBridge {
    /// Wraps an engine.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let revision = Arc::new(Channel::new(0u64));

        let bump = Arc::clone(&revision);
        let status_sub = engine.on_status(move |_| {
            bump.modify(|r| *r += 1);
        });
        let bump = Arc::clone(&revision);
        let user_sub = engine.on_user(move |_| {
            bump.modify(|r| *r += 1);
        });

        Self {
            engine,
            getter: Mutex::new(None),
            revision,
            _status_sub: status_sub,
            _user_sub: user_sub,
        }
    }

    /// Calls `callback` with a revision number now and after every change.
    pub fn on_change(&self, callback: impl Fn(u64) + Send + Sync + 'static) -> Subscription {
        self.revision.subscribe(move |r| callback(*r))
    }

    /// Whether the engine has started and knows who is signed in.
    pub fn ready(&self) -> bool {
        self.engine.is_initialized() && self.engine.get_status().state != SyncState::Initializing
    }

    /// The signed-in user.
    pub fn user(&self) -> Option<UserInfo> {
        self.engine.get_user()
    }

    /// Whether an operation is in progress.
    pub fn busy(&self) -> bool {
        self.engine.get_status().state.is_busy()
    }

    /// The last error message, if the last operation failed.
    pub fn error(&self) -> Option<String> {
        self.engine.get_status().error
    }

    /// Starts a sign-in.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::sign_in`].
    pub async fn sign_in(&self) -> SyncResult<()> {
        self.engine.sign_in().await
    }

    /// Flushes pending edits and signs out.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::sign_out_now`].
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.engine.sign_out_now().await
    }

    /// Registers `getter` as the local state source and schedules a
    /// debounced push. Never writes synchronously.
    ///
    /// The bridge keeps the getter alive until the next call.
    pub fn push_local(&self, getter: Arc<dyn LocalSnapshotSource>) {
        self.engine.set_local_snapshot_getter(&getter);
        *self.getter.lock() = Some(getter);
        self.engine.notify_local_change();
    }

    /// Registers the consumer of remote snapshots.
    pub fn set_remote_applier(&self, applier: Arc<dyn RemoteApplier>) {
        self.engine.set_remote_applier(applier);
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }
}
