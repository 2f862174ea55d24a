//! # questsync testkit
//!
//! Test utilities for questsync.
//!
//! This crate provides:
//! - Property-based generators for application states
//! - Device fixtures that wire an engine to shared in-memory collaborators
//! - Canonical encoding vectors
//!
//! ## Usage
//!
//! ```rust
//! use questsync_testkit::prelude::*;
//! use proptest::strategy::{Strategy, ValueTree};
//! use proptest::test_runner::TestRunner;
//!
//! let mut runner = TestRunner::default();
//! let state = app_state_strategy().new_tree(&mut runner).unwrap().current();
//! assert!(state.get("tasks").is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use vectors::*;
