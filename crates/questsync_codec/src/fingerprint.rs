//! Content fingerprints for change detection.

use crate::encoder::to_canonical_cbor;
use crate::error::CodecResult;
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a value's canonical CBOR encoding.
///
/// Two values have the same fingerprint exactly when they encode to the
/// same canonical bytes, so an unchanged snapshot always maps to the same
/// fingerprint regardless of how its maps were built.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a value.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be canonically encoded (non-finite floats).
    pub fn of(value: &Value) -> CodecResult<Self> {
        let bytes = to_canonical_cbor(value)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Fingerprint of already-encoded bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
