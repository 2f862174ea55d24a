//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// Encode a value to canonical CBOR bytes.
///
/// Output is deterministic so that it can be hashed into a snapshot
/// fingerprint:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - Floats are always 64-bit and must be finite
/// - No indefinite-length encoding
///
/// # Errors
///
/// Returns [`CodecError::NonFiniteFloat`] if the value contains NaN or an
/// infinity.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Float(f) => self.encode_float(*f)?,
            Value::Text(s) => self.encode_text(s),
            Value::Array(items) => {
                self.encode_head(4, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Map(fields) => self.encode_map(fields)?,
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 encodes as argument 0, -2 as 1, and so on.
            self.encode_head(1, (-(n + 1)) as u64);
        }
    }

    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if !f.is_finite() {
            return Err(CodecError::NonFiniteFloat);
        }
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_head(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_map(&mut self, fields: &BTreeMap<String, Value>) -> CodecResult<()> {
        // BTreeMap order is bytewise; canonical order is length-first.
        let mut keys: Vec<&String> = fields.keys().collect();
        keys.sort_by(|a, b| compare_keys(a.as_bytes(), b.as_bytes()));

        self.encode_head(5, fields.len() as u64);
        for key in keys {
            self.encode_text(key);
            self.encode(&fields[key])?;
        }
        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Length-first, then bytewise ordering of map keys.
pub(crate) fn compare_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
