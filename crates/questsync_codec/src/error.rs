//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or mapping snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// NaN and infinite floats have no canonical form.
    #[error("non-finite float values cannot be encoded")]
    NonFiniteFloat,

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Input continued after the top-level item.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Invalid CBOR structure.
    #[error("invalid CBOR structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Unsupported CBOR type.
    #[error("unsupported CBOR type: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported type.
        type_name: String,
    },

    /// A declared length exceeds the decoder's limits.
    #[error("declared size {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Length claimed by the input.
        claimed: u64,
        /// Maximum accepted length.
        max_allowed: u64,
    },

    /// Local state and wire documents must be maps at the top level.
    #[error("expected a map, found {found}")]
    NotAMap {
        /// Kind of value that was found instead.
        found: &'static str,
    },

    /// Local state used a field name owned by the wire format.
    #[error("field `{field}` is reserved for the wire document")]
    ReservedField {
        /// The offending field name.
        field: String,
    },

    /// A wire field had the wrong type.
    #[error("wire field `{field}` must be {expected}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Expected kind.
        expected: &'static str,
    },

    /// Conversion through serde failed.
    #[error("serde conversion failed: {0}")]
    Serde(String),
}

impl CodecError {
    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}
