//! In-memory collaborators for tests, demos and the simulator.

use crate::error::{AuthError, StoreError};
use crate::identity::{IdentityListener, IdentityProvider, UserInfo};
use crate::store::{DocPath, DocumentStore, SetOptions, SnapshotListener};
use crate::subscription::Subscription;
use async_trait::async_trait;
use parking_lot::Mutex;
use questsync_codec::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Server clock start for [`MemoryDocumentStore`] timestamps (ms).
const CLOCK_EPOCH_MS: i64 = 1_700_000_000_000;

/// A write accepted by [`MemoryDocumentStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Target document.
    pub path: DocPath,
    /// Value as sent by the writer.
    pub value: Value,
    /// Options the writer passed.
    pub options: SetOptions,
}

#[derive(Default)]
struct StoreInner {
    documents: BTreeMap<DocPath, Value>,
    listeners: BTreeMap<DocPath, Vec<(u64, SnapshotListener)>>,
    next_listener: u64,
    clock: i64,
    pending_failures: VecDeque<StoreError>,
    writes: Vec<WriteRecord>,
    attempts: usize,
}

impl StoreInner {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        CLOCK_EPOCH_MS + self.clock
    }

    fn listeners_for(&self, path: &DocPath) -> Vec<SnapshotListener> {
        self.listeners
            .get(path)
            .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

/// A shared in-memory document store.
///
/// Behaves like a single server: `set` with `merge` merges top-level fields,
/// server timestamps come from a logical clock, and every listener on a
/// path is called synchronously after each change (including the writer's
/// own, so writers see echoes). New listeners receive the current document
/// immediately.
///
/// Writes can be made to fail with [`MemoryDocumentStore::fail_next_writes`].
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<StoreInner>>,
    configured: bool,
}

impl MemoryDocumentStore {
    /// Creates an empty, configured store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            configured: true,
        }
    }

    /// Creates a store that reports itself as unconfigured.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Makes the next `count` writes fail with `error`.
    pub fn fail_next_writes(&self, error: StoreError, count: usize) {
        let mut inner = self.inner.lock();
        inner
            .pending_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Writes a document as another client would, replacing it entirely and
    /// notifying listeners. Not recorded in [`Self::writes`].
    pub fn put_remote(&self, path: &DocPath, value: Value) {
        let (doc, listeners) = {
            let mut inner = self.inner.lock();
            inner.documents.insert(path.clone(), value.clone());
            (value, inner.listeners_for(path))
        };
        for listener in listeners {
            listener(Some(doc.clone()));
        }
    }

    /// Deletes a document and notifies listeners with `None`.
    pub fn delete(&self, path: &DocPath) {
        let listeners = {
            let mut inner = self.inner.lock();
            inner.documents.remove(path);
            inner.listeners_for(path)
        };
        for listener in listeners {
            listener(None);
        }
    }

    /// The stored document at `path`.
    pub fn document(&self, path: &DocPath) -> Option<Value> {
        self.inner.lock().documents.get(path).cloned()
    }

    /// Every accepted write, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().writes.clone()
    }

    /// Number of accepted writes.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// Number of accepted writes to `path`.
    pub fn writes_to(&self, path: &DocPath) -> usize {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|w| &w.path == path)
            .count()
    }

    /// Number of `set` calls, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.inner.lock().attempts
    }

    /// Number of active listeners on `path`.
    pub fn listener_count(&self, path: &DocPath) -> usize {
        self.inner.lock().listeners.get(path).map_or(0, Vec::len)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        Ok(self.document(path))
    }

    async fn set(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        let (doc, listeners) = {
            let mut inner = self.inner.lock();
            inner.attempts += 1;
            if let Some(error) = inner.pending_failures.pop_front() {
                return Err(error);
            }

            let Value::Map(fields) = value.clone() else {
                return Err(StoreError::Other(format!(
                    "document must be a map, got {}",
                    value.kind()
                )));
            };

            let mut doc = match inner.documents.get(path) {
                Some(Value::Map(existing)) if options.merge => existing.clone(),
                _ => BTreeMap::new(),
            };
            doc.extend(fields);
            if let Some(field) = &options.server_timestamp {
                let now = inner.tick();
                doc.insert(field.clone(), Value::Integer(now));
            }

            let doc = Value::Map(doc);
            inner.documents.insert(path.clone(), doc.clone());
            inner.writes.push(WriteRecord {
                path: path.clone(),
                value,
                options,
            });
            (doc, inner.listeners_for(path))
        };

        for listener in listeners {
            listener(Some(doc.clone()));
        }
        Ok(())
    }

    fn subscribe(&self, path: &DocPath, listener: SnapshotListener) -> Subscription {
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner
                .listeners
                .entry(path.clone())
                .or_default()
                .push((id, Arc::clone(&listener)));
            (id, inner.documents.get(path).cloned())
        };

        listener(current);

        let weak = Arc::downgrade(&self.inner);
        let path = path.clone();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock();
                if let Some(listeners) = inner.listeners.get_mut(&path) {
                    listeners.retain(|(lid, _)| *lid != id);
                    if listeners.is_empty() {
                        inner.listeners.remove(&path);
                    }
                }
            }
        })
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

/// How a sign-in was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInMethod {
    /// [`IdentityProvider::sign_in_interactive`].
    Interactive,
    /// [`IdentityProvider::sign_in_redirect`].
    Redirect,
}

struct IdentityInner {
    current: Option<UserInfo>,
    account: UserInfo,
    listeners: Vec<(u64, IdentityListener)>,
    next_listener: u64,
    interactive_failures: VecDeque<AuthError>,
    redirect_failures: VecDeque<AuthError>,
    sign_out_failures: VecDeque<AuthError>,
    calls: Vec<SignInMethod>,
}

/// A scriptable identity provider.
///
/// A successful sign-in emits the configured account; sign-out emits
/// `None`. Tests can also emit arbitrary identities with
/// [`MockIdentityProvider::emit`].
#[derive(Clone)]
pub struct MockIdentityProvider {
    inner: Arc<Mutex<IdentityInner>>,
    configured: bool,
}

impl MockIdentityProvider {
    /// Creates a signed-out provider whose sign-in yields `account`.
    pub fn new(account: UserInfo) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IdentityInner {
                current: None,
                account,
                listeners: Vec::new(),
                next_listener: 0,
                interactive_failures: VecDeque::new(),
                redirect_failures: VecDeque::new(),
                sign_out_failures: VecDeque::new(),
                calls: Vec::new(),
            })),
            configured: true,
        }
    }

    /// Creates a provider that reports itself as unconfigured.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(UserInfo::new("unconfigured"))
        }
    }

    /// Sets the account the next sign-in yields.
    pub fn set_account(&self, account: UserInfo) {
        self.inner.lock().account = account;
    }

    /// Makes the next interactive sign-in fail.
    pub fn fail_interactive(&self, error: AuthError) {
        self.inner.lock().interactive_failures.push_back(error);
    }

    /// Makes the next redirect sign-in fail.
    pub fn fail_redirect(&self, error: AuthError) {
        self.inner.lock().redirect_failures.push_back(error);
    }

    /// Makes the next sign-out fail.
    pub fn fail_sign_out(&self, error: AuthError) {
        self.inner.lock().sign_out_failures.push_back(error);
    }

    /// Sign-in methods called so far.
    pub fn calls(&self) -> Vec<SignInMethod> {
        self.inner.lock().calls.clone()
    }

    /// The identity last emitted.
    pub fn current(&self) -> Option<UserInfo> {
        self.inner.lock().current.clone()
    }

    /// Sets the identity and notifies listeners.
    pub fn emit(&self, user: Option<UserInfo>) {
        let listeners: Vec<IdentityListener> = {
            let mut inner = self.inner.lock();
            inner.current = user.clone();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(user.clone());
        }
    }

    fn sign_in_with(&self, method: SignInMethod) -> Result<(), AuthError> {
        let account = {
            let mut inner = self.inner.lock();
            inner.calls.push(method);
            let failure = match method {
                SignInMethod::Interactive => inner.interactive_failures.pop_front(),
                SignInMethod::Redirect => inner.redirect_failures.pop_front(),
            };
            if let Some(error) = failure {
                return Err(error);
            }
            inner.account.clone()
        };
        self.emit(Some(account));
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn on_identity_change(&self, listener: IdentityListener) -> Subscription {
        let (id, current) = {
            let mut inner = self.inner.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.push((id, Arc::clone(&listener)));
            (id, inner.current.clone())
        };

        listener(current);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    async fn sign_in_interactive(&self) -> Result<(), AuthError> {
        self.sign_in_with(SignInMethod::Interactive)
    }

    async fn sign_in_redirect(&self) -> Result<(), AuthError> {
        self.sign_in_with(SignInMethod::Redirect)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(error) = self.inner.lock().sign_out_failures.pop_front() {
            return Err(error);
        }
        self.emit(None);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}
