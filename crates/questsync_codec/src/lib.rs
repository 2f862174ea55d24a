//! # questsync codec
//!
//! Document values, canonical CBOR and snapshot mapping for questsync.
//!
//! This crate provides:
//! - [`Value`], the dynamic shape of local state and remote documents
//! - Deterministic CBOR encoding so identical states produce identical bytes
//! - [`Fingerprint`], a SHA-256 digest used to detect no-op pushes
//! - [`SnapshotCodec`] and [`WireDocument`], the mapping between local state
//!   and the single remote document per user
//! - [`check_reset_epoch`], the guard that rejects documents written before a
//!   local reset
//!
//! ## Canonical CBOR Rules
//!
//! - Map keys are text, sorted length-first then bytewise
//! - Integers use shortest encoding
//! - Floats are 64-bit and finite
//! - No indefinite-length items, tags or byte strings
//!
//! ## Usage
//!
//! ```
//! use questsync_codec::{Fingerprint, SnapshotCodec, Value};
//!
//! let state = Value::map([("xp", Value::Integer(0)), ("tasks", Value::Array(vec![]))]);
//! let codec = SnapshotCodec::new();
//!
//! let wire = codec.encode(&state, 0).unwrap();
//! assert_eq!(codec.decode(&wire), state);
//!
//! let fp = Fingerprint::of(&state).unwrap();
//! assert_eq!(fp, codec.fingerprint(&codec.decode(&wire)).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod fingerprint;
mod snapshot;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use fingerprint::Fingerprint;
pub use snapshot::{
    check_reset_epoch, EpochVerdict, SnapshotCodec, WireDocument, RESERVED_FIELDS,
    RESET_EPOCH_FIELD, UPDATED_AT_FIELD,
};
pub use value::Value;
