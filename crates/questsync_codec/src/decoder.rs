//! Canonical CBOR decoder.

use crate::encoder::compare_keys;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 1024 * 1024;

/// Maximum allowed text length in bytes.
const MAX_TEXT_LENGTH: u64 = 64 * 1024 * 1024;

/// Maximum nesting depth accepted from untrusted input.
const MAX_DEPTH: usize = 128;

/// Decode a single value from canonical CBOR bytes.
///
/// The input must contain exactly one item.
///
/// # Errors
///
/// Returns an error if the bytes are not canonical CBOR as produced by
/// [`crate::to_canonical_cbor`], or if bytes remain after the item.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A canonical CBOR decoder.
///
/// Rejects anything the encoder would not have produced: non-shortest
/// integers, unsorted or non-text map keys, short floats, indefinite
/// lengths, tags and byte strings.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::invalid_structure("nesting too deep"));
        }

        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_unsigned(additional_info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::invalid_structure("integer exceeds i64"))
            }
            1 => {
                let n = self.decode_unsigned(additional_info)?;
                i64::try_from(n)
                    .map(|n| Value::Integer(-n - 1))
                    .map_err(|_| CodecError::invalid_structure("integer exceeds i64"))
            }
            2 => Err(CodecError::unsupported_type("byte string")),
            3 => self.decode_text(additional_info).map(Value::Text),
            4 => self.nested(|d| d.decode_array(additional_info)),
            5 => self.nested(|d| d.decode_map(additional_info)),
            6 => Err(CodecError::unsupported_type("tag")),
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        let non_canonical =
            || CodecError::invalid_structure("non-canonical: value could be encoded in fewer bytes");

        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(non_canonical());
                }
                Ok(u64::from(byte))
            }
            25 => {
                let b = self.read_bytes(2)?;
                let value = u16::from_be_bytes([b[0], b[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            26 => {
                let b = self.read_bytes(4)?;
                let value = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            27 => {
                let b = self.read_bytes(8)?;
                let value = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                if u32::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(value)
            }
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => Err(CodecError::invalid_structure("reserved additional info")),
        }
    }

    fn decode_len(&mut self, additional_info: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.decode_unsigned(additional_info)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        })
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<String> {
        let len = self.decode_len(additional_info, MAX_TEXT_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_len(additional_info, MAX_CONTAINER_ELEMENTS)?;
        // Every element takes at least one byte.
        let mut items = Vec::with_capacity(len.min(self.remaining().len()));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_len(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut fields = BTreeMap::new();
        let mut prev_key: Option<String> = None;

        for _ in 0..len {
            let head = self.read_byte()?;
            if head >> 5 != 3 {
                return Err(CodecError::invalid_structure("map keys must be text"));
            }
            let key = self.decode_text(head & 0x1f)?;

            if let Some(prev) = &prev_key {
                if compare_keys(prev.as_bytes(), key.as_bytes()) != std::cmp::Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }

            let value = self.decode()?;
            fields.insert(key.clone(), value);
            prev_key = Some(key);
        }

        Ok(Value::Map(fields))
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            25 | 26 => Err(CodecError::invalid_structure(
                "non-canonical: floats must be 64-bit",
            )),
            27 => {
                let b = self.read_bytes(8)?;
                let bits = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                let f = f64::from_bits(bits);
                if !f.is_finite() {
                    return Err(CodecError::NonFiniteFloat);
                }
                Ok(Value::Float(f))
            }
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}
