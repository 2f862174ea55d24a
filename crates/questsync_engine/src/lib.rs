//! # questsync engine
//!
//! Offline-first synchronization between an application's local state and
//! a single remote document per user.
//!
//! This crate provides:
//! - [`SyncEngine`]: session lifecycle, remote subscription, debounced push,
//!   echo and staleness guards, backoff on failure
//! - [`StatusBus`]: status and user broadcast with replay for late
//!   subscribers
//! - [`SyncBridge`]: the narrow surface presentation code talks to
//! - [`BackoffPolicy`] and [`next_delay`]: retry timing
//! - [`DocumentStore`] and [`IdentityProvider`]: the collaborator contracts,
//!   with in-memory implementations for tests and simulation
//!
//! ## Key Invariants
//!
//! - At most one remote subscription, scoped to the current uid
//! - An unchanged state is never written twice
//! - Applying a remote snapshot never triggers a push of that snapshot
//! - Snapshots written before a local reset are never applied
//! - `last_sync_at` only moves forward
//! - Work scheduled for a previous user is discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod bridge;
mod config;
mod engine;
mod error;
mod identity;
mod memory;
mod status;
mod store;
mod subscription;

pub use backoff::{next_delay, Backoff, BackoffPolicy};
pub use bridge::SyncBridge;
pub use config::{SignInEnvironment, SyncConfig, DEFAULT_DEBOUNCE};
pub use engine::{
    LocalSnapshotSource, PushOutcome, RemoteApplier, SkipReason, SyncEngine, SyncStats,
};
pub use error::{AuthError, StoreError, SyncError, SyncResult};
pub use identity::{IdentityListener, IdentityProvider, UserInfo};
pub use memory::{MemoryDocumentStore, MockIdentityProvider, SignInMethod, WriteRecord};
pub use status::{Channel, StatusBus, SyncState, SyncStatus};
pub use store::{DocPath, DocPathTemplate, DocumentStore, SetOptions, SnapshotListener};
pub use subscription::Subscription;
