//! Engine status and the broadcaster that publishes it.

use crate::identity::UserInfo;
use crate::subscription::Subscription;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Nothing in progress.
    Idle,
    /// The store or identity provider is not configured. Sync attempts are
    /// suppressed for the life of the engine.
    Disabled,
    /// `init()` ran and the first identity event has not arrived yet.
    Initializing,
    /// A sign-in flow is running.
    SigningIn,
    /// A sign-out is running.
    SigningOut,
    /// Waiting for the user's remote document.
    Pulling,
    /// A write is in flight.
    Pushing,
    /// Reconciling local and remote state.
    Merging,
    /// A remote snapshot is being handed to the application.
    Applying,
    /// The last operation failed. Cleared by the next success.
    Error,
}

impl SyncState {
    /// Returns true while an operation is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SyncState::SigningIn
                | SyncState::SigningOut
                | SyncState::Pulling
                | SyncState::Pushing
                | SyncState::Merging
                | SyncState::Applying
                | SyncState::Initializing
        )
    }

    /// Lowercase name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Disabled => "disabled",
            SyncState::Initializing => "initializing",
            SyncState::SigningIn => "signing_in",
            SyncState::SigningOut => "signing_out",
            SyncState::Pulling => "pulling",
            SyncState::Pushing => "pushing",
            SyncState::Merging => "merging",
            SyncState::Applying => "applying",
            SyncState::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// Message of the last failure, until the next success.
    pub error: Option<String>,
    /// Time of the last successful push or applied snapshot.
    pub last_sync_at: Option<SystemTime>,
}

impl SyncStatus {
    /// An idle status with no history.
    pub fn idle() -> Self {
        Self::with_state(SyncState::Idle)
    }

    /// A status in `state` with no error and no history.
    pub fn with_state(state: SyncState) -> Self {
        Self {
            state,
            error: None,
            last_sync_at: None,
        }
    }

    /// Moves `last_sync_at` forward to `at`. Earlier times are ignored.
    pub fn advance_last_sync(&mut self, at: SystemTime) {
        if self.last_sync_at.map_or(true, |current| at > current) {
            self.last_sync_at = Some(at);
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::idle()
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ChannelInner<T> {
    current: T,
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// A single-value broadcast channel with replay.
///
/// New subscribers are called once with the current value. `publish`
/// stores the value and calls every subscriber in registration order. A
/// panicking subscriber is logged and skipped; the rest are still called.
/// No lock is held while subscribers run, so they may subscribe, unsubscribe
/// or publish re-entrantly.
pub struct Channel<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Creates a channel holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                current: initial,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers `callback` and calls it with the current value.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let callback: Callback<T> = Arc::new(callback);
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::clone(&callback)));
            (id, inner.current.clone())
        };

        deliver(&callback, &current);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Replaces the current value and notifies subscribers.
    pub fn publish(&self, value: T) {
        self.modify(|current| *current = value);
    }

    /// Edits the current value in place and notifies subscribers with the
    /// result.
    pub fn modify(&self, edit: impl FnOnce(&mut T)) -> T {
        let (value, subscribers) = {
            let mut inner = self.inner.lock();
            edit(&mut inner.current);
            let subscribers: Vec<Callback<T>> =
                inner.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (inner.current.clone(), subscribers)
        };

        for callback in &subscribers {
            deliver(callback, &value);
        }
        value
    }

    /// The current value.
    pub fn current(&self) -> T {
        self.inner.lock().current.clone()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

fn deliver<T>(callback: &Callback<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        warn!("status subscriber panicked");
    }
}

/// Broadcaster for engine status and the signed-in user.
pub struct StatusBus {
    /// Engine status transitions.
    pub status: Channel<SyncStatus>,
    /// The signed-in user, `None` when signed out.
    pub user: Channel<Option<UserInfo>>,
}

impl StatusBus {
    /// Creates a bus with the given initial status and no user.
    pub fn new(initial: SyncStatus) -> Self {
        Self {
            status: Channel::new(initial),
            user: Channel::new(None),
        }
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(SyncStatus::idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&i32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &i32| sink.lock().push(*v))
    }

    #[test]
    fn replays_current_value() {
        let channel = Channel::new(1);
        channel.publish(2);

        let (seen, callback) = recorder();
        let _sub = channel.subscribe(callback);
        assert_eq!(*seen.lock(), vec![2]);

        channel.publish(3);
        assert_eq!(*seen.lock(), vec![2, 3]);
    }

    #[test]
    fn registration_order() {
        let channel = Channel::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                channel.subscribe(move |v: &i32| {
                    if *v > 0 {
                        order.lock().push(i);
                    }
                })
            })
            .collect();

        channel.publish(1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let channel = Channel::new(0);
        let (seen, callback) = recorder();
        let sub = channel.subscribe(callback);
        assert_eq!(channel.subscriber_count(), 1);

        sub.unsubscribe();
        channel.publish(5);
        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let channel = Channel::new(0);
        let _bad = channel.subscribe(|v: &i32| {
            if *v == 7 {
                panic!("subscriber failure");
            }
        });
        let (seen, callback) = recorder();
        let _good = channel.subscribe(callback);

        channel.publish(7);
        assert_eq!(*seen.lock(), vec![0, 7]);
        assert_eq!(channel.current(), 7);
    }

    #[test]
    fn reentrant_publish() {
        let channel = Arc::new(Channel::new(0));
        let inner = Arc::clone(&channel);
        let _sub = channel.subscribe(move |v: &i32| {
            if *v == 1 {
                inner.publish(2);
            }
        });
        channel.publish(1);
        assert_eq!(channel.current(), 2);
    }

    #[test]
    fn last_sync_only_moves_forward() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut status = SyncStatus::idle();
        status.advance_last_sync(t0);
        status.advance_last_sync(t0 - Duration::from_secs(5));
        assert_eq!(status.last_sync_at, Some(t0));
        status.advance_last_sync(t0 + Duration::from_secs(1));
        assert_eq!(status.last_sync_at, Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn busy_states() {
        assert!(SyncState::Pushing.is_busy());
        assert!(SyncState::Initializing.is_busy());
        assert!(!SyncState::Idle.is_busy());
        assert!(!SyncState::Error.is_busy());
        assert!(!SyncState::Disabled.is_busy());
        assert_eq!(SyncState::SigningIn.to_string(), "signing_in");
    }
}
