//! Mapping between local application state and the remote wire document.
//!
//! The remote document is the local state's top-level fields plus two
//! fields owned by the sync layer:
//!
//! - `updatedAt`: assigned by the store on every write
//! - `resetEpoch`: the writer's reset epoch at the time of the write
//!
//! Neither is part of the local shape, so `decode(encode(x)) == x`.

use crate::error::{CodecError, CodecResult};
use crate::fingerprint::Fingerprint;
use crate::value::Value;
use std::collections::BTreeMap;

/// Field holding the server-assigned write timestamp.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Field holding the writer's reset epoch.
pub const RESET_EPOCH_FIELD: &str = "resetEpoch";

/// Field names local state may not use.
pub const RESERVED_FIELDS: [&str; 2] = [UPDATED_AT_FIELD, RESET_EPOCH_FIELD];

/// A remote document split into application state and sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct WireDocument {
    /// Application fields.
    pub state: BTreeMap<String, Value>,
    /// Reset epoch recorded by the writer. Absent on documents written
    /// before any reset happened.
    pub reset_epoch: Option<i64>,
    /// Server timestamp of the last write, if the store reported one.
    pub updated_at: Option<i64>,
}

impl WireDocument {
    /// The document's reset epoch, treating an absent field as 0.
    pub fn reset_epoch_or_default(&self) -> i64 {
        self.reset_epoch.unwrap_or(0)
    }

    /// Flattens this document into the map shape stored remotely.
    pub fn into_value(self) -> Value {
        let mut fields = self.state;
        if let Some(epoch) = self.reset_epoch {
            fields.insert(RESET_EPOCH_FIELD.to_string(), Value::Integer(epoch));
        }
        if let Some(ts) = self.updated_at {
            fields.insert(UPDATED_AT_FIELD.to_string(), Value::Integer(ts));
        }
        Value::Map(fields)
    }

    /// Splits a stored document into state and metadata.
    ///
    /// `updatedAt` is dropped silently when it is not an integer, since its
    /// representation belongs to the store. A `resetEpoch` that is neither
    /// null nor a whole number makes the document undecodable.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAMap`] or [`CodecError::InvalidField`].
    pub fn from_value(value: Value) -> CodecResult<Self> {
        let mut fields = match value {
            Value::Map(fields) => fields,
            other => return Err(CodecError::NotAMap { found: other.kind() }),
        };

        let reset_epoch = match fields.remove(RESET_EPOCH_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::Integer(n)) => Some(n),
            #[allow(clippy::cast_possible_truncation)]
            Some(Value::Float(f)) if is_exact_i64(f) => Some(f as i64),
            Some(_) => {
                return Err(CodecError::InvalidField {
                    field: RESET_EPOCH_FIELD,
                    expected: "an integer",
                })
            }
        };

        let updated_at = fields.remove(UPDATED_AT_FIELD).and_then(|v| v.as_integer());

        Ok(Self {
            state: fields,
            reset_epoch,
            updated_at,
        })
    }
}

/// Whether `f` is a whole number inside the `i64` range, so the cast
/// neither truncates nor saturates.
#[allow(clippy::cast_precision_loss)]
fn is_exact_i64(f: f64) -> bool {
    // `i64::MAX as f64` rounds up to 2^63, which is out of range.
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Converts local state to and from [`WireDocument`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Creates a codec.
    pub fn new() -> Self {
        Self
    }

    /// Maps local state onto a wire document carrying `reset_epoch`.
    ///
    /// The store assigns `updatedAt` on write, so it is left empty here.
    ///
    /// # Errors
    ///
    /// The state must be a map and must not use a reserved field name.
    pub fn encode(&self, state: &Value, reset_epoch: i64) -> CodecResult<WireDocument> {
        let fields = state
            .as_map()
            .ok_or(CodecError::NotAMap { found: state.kind() })?;

        if let Some(field) = RESERVED_FIELDS.iter().find(|f| fields.contains_key(**f)) {
            return Err(CodecError::ReservedField {
                field: (*field).to_string(),
            });
        }

        Ok(WireDocument {
            state: fields.clone(),
            reset_epoch: Some(reset_epoch),
            updated_at: None,
        })
    }

    /// Recovers the local state from a wire document.
    pub fn decode(&self, document: &WireDocument) -> Value {
        Value::Map(document.state.clone())
    }

    /// Fingerprint of a local state value.
    ///
    /// # Errors
    ///
    /// Fails if the state contains non-finite floats.
    pub fn fingerprint(&self, state: &Value) -> CodecResult<Fingerprint> {
        Fingerprint::of(state)
    }
}

/// Outcome of comparing a remote document's reset epoch with the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochVerdict {
    /// Same epoch; apply normally.
    Accept,
    /// Another device reset; apply and adopt the remote epoch locally.
    Adopt(i64),
    /// The document predates a local reset and must be ignored.
    Stale {
        /// Epoch found on the remote document.
        remote: i64,
        /// Locally persisted epoch.
        local: i64,
    },
}

impl EpochVerdict {
    /// Whether the snapshot should be applied.
    pub fn accepts(&self) -> bool {
        !matches!(self, EpochVerdict::Stale { .. })
    }
}

/// Compares a remote reset epoch (absent = 0) against the local marker.
pub fn check_reset_epoch(remote: Option<i64>, local: i64) -> EpochVerdict {
    let remote = remote.unwrap_or(0);
    match remote.cmp(&local) {
        std::cmp::Ordering::Less => EpochVerdict::Stale { remote, local },
        std::cmp::Ordering::Equal => EpochVerdict::Accept,
        std::cmp::Ordering::Greater => EpochVerdict::Adopt(remote),
    }
}
