//! # questsync storage
//!
//! Durable local markers for the questsync engine.
//!
//! The engine remembers very little between runs: who was signed in last
//! and, per user, how many times local state has been reset. This crate
//! provides:
//!
//! - [`KeyValueStore`], the storage abstraction
//! - [`InMemoryStore`] for tests and throwaway sessions
//! - [`FileStore`], an append-only log that survives crashes mid-write
//! - [`LocalMarkers`], typed access to the markers themselves
//!
//! ## Example
//!
//! ```rust
//! use questsync_storage::{InMemoryStore, LocalMarkers};
//! use std::sync::Arc;
//!
//! let markers = LocalMarkers::new(Arc::new(InMemoryStore::new()));
//! markers.set_last_uid("u1").unwrap();
//! assert_eq!(markers.bump_reset_epoch("u1").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod markers;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use markers::{reset_epoch_key, LocalMarkers, LAST_UID_KEY, RESET_EPOCH_PREFIX};
pub use memory::InMemoryStore;
pub use store::KeyValueStore;
