//! Canonical encoding test vectors.
//!
//! Fixed values with their expected canonical CBOR bytes. Any change to
//! these bytes changes every fingerprint, so they pin the format.

use questsync_codec::Value;

/// A value and its canonical encoding.
pub struct TestVector {
    /// Short description.
    pub name: &'static str,
    /// The value.
    pub value: Value,
    /// Expected canonical CBOR, hex.
    pub cbor_hex: &'static str,
}

/// All canonical encoding vectors.
pub fn canonical_vectors() -> Vec<TestVector> {
    vec![
        TestVector {
            name: "null",
            value: Value::Null,
            cbor_hex: "f6",
        },
        TestVector {
            name: "small integer",
            value: Value::Integer(10),
            cbor_hex: "0a",
        },
        TestVector {
            name: "one-byte integer",
            value: Value::Integer(100),
            cbor_hex: "1864",
        },
        TestVector {
            name: "negative integer",
            value: Value::Integer(-500),
            cbor_hex: "3901f3",
        },
        TestVector {
            name: "float is always 64-bit",
            value: Value::Float(1.5),
            cbor_hex: "fb3ff8000000000000",
        },
        TestVector {
            name: "text",
            value: Value::from("xp"),
            cbor_hex: "627870",
        },
        TestVector {
            name: "empty array",
            value: Value::Array(vec![]),
            cbor_hex: "80",
        },
        TestVector {
            name: "keys sorted by length first",
            value: Value::map([("tasks", Value::Array(vec![])), ("xp", Value::Integer(0))]),
            cbor_hex: "a262787000657461736b7380",
        },
    ]
}

/// Hex-encodes bytes.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
