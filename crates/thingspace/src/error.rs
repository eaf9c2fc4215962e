//! Error types for schema construction, encoding/decoding and the Space.

use thiserror::Error;

use crate::space::NodeId;

/// Error codes grouping decode failures by cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Not a snapshot, or a snapshot from an unknown format version
    InvalidMagicOrVersion,
    /// E002: Unknown schema reference (type, enum id)
    UnknownReference,
    /// E004: Text that is not UTF-8
    InvalidUtf8,
    /// E005: Malformed varint/length/flags/encoding
    MalformedEncoding,
}

impl ErrorCode {
    /// The bracketed code used as a prefix in error messages.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMagicOrVersion => "E001",
            ErrorCode::UnknownReference => "E002",
            ErrorCode::InvalidUtf8 => "E004",
            ErrorCode::MalformedEncoding => "E005",
        }
    }
}

/// Failure while reading the binary form or a snapshot envelope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    // === E001: Envelope header ===
    #[error("[E001] invalid magic bytes: expected THG1 or THG1Z, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("[E001] snapshot format version {version} is not supported")]
    UnsupportedVersion { version: u8 },

    // === E002: Unknown schema reference ===
    #[error("[E002] unknown type {name:?}")]
    UnknownType { name: String },

    #[error("[E002] unknown id {id} for enum {enum_name}")]
    UnknownEnumId { enum_name: String, id: u64 },

    // === E004: Text ===
    #[error("[E004] {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    // === E005: Structure ===
    #[error("[E005] input ended while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("[E005] varint longer than 10 bytes")]
    VarintTooLong,

    #[error("[E005] varint does not fit in 64 bits")]
    VarintOverflow,

    #[error("[E005] {field} declares {len} entries, limit is {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("[E005] bool byte must be 0 or 1, got {value}")]
    InvalidBool { value: u8 },

    #[error("[E005] nesting depth exceeds maximum {max}")]
    DepthExceeded { max: usize },

    #[error("[E005] malformed {context}")]
    MalformedEncoding { context: &'static str },

    // === Envelope payload ===
    #[error("[E005] zstd payload rejected: {0}")]
    DecompressionFailed(String),

    #[error("[E005] payload inflated to {actual} bytes, header declared {declared}")]
    UncompressedSizeMismatch { declared: usize, actual: usize },
}

impl DecodeError {
    /// Groups the error under its E00x code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::InvalidMagic { .. } | DecodeError::UnsupportedVersion { .. } => {
                ErrorCode::InvalidMagicOrVersion
            }
            DecodeError::UnknownType { .. } | DecodeError::UnknownEnumId { .. } => {
                ErrorCode::UnknownReference
            }
            DecodeError::InvalidUtf8 { .. } => ErrorCode::InvalidUtf8,
            _ => ErrorCode::MalformedEncoding,
        }
    }
}

/// Failure while writing the binary form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{field} has {len} entries, limit is {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("value of field {type_name}.{field} does not match its declared kind")]
    KindMismatch { type_name: String, field: String },

    #[error("nesting depth exceeds maximum {max}")]
    DepthExceeded { max: usize },

    #[error("zstd rejected the payload: {0}")]
    CompressionFailed(String),
}

/// Error while assembling or querying a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("name {name:?} is defined more than once")]
    DuplicateName { name: String },

    #[error("field {type_name}.{field} is defined more than once")]
    DuplicateField { type_name: String, field: String },

    #[error("compat id {compat_id} is used by more than one field of {type_name}")]
    DuplicateCompatId { type_name: String, compat_id: u32 },

    #[error("unknown type {name:?}")]
    UnknownType { name: String },

    #[error("unknown enum {name:?}")]
    UnknownEnum { name: String },

    #[error("unknown open type {name:?}")]
    UnknownOpenType { name: String },

    #[error("unknown field {type_name}.{field}")]
    UnknownField { type_name: String, field: String },

    #[error("enum {enum_name} uses reserved or duplicate id {id}")]
    InvalidEnumId { enum_name: String, id: u32 },

    #[error("derived fields of {type_name} form a cycle through {fields:?}")]
    DerivationCycle { type_name: String, fields: Vec<String> },

    #[error("trigger on {type_name}.{field} has an unresolvable path {path:?}")]
    InvalidTriggerPath {
        type_name: String,
        field: String,
        path: Vec<String>,
    },

    #[error("field {type_name}.{field} declares triggers but is not a contextual derivation")]
    NotContextual { type_name: String, field: String },

    #[error("value for {type_name}.{field} does not match its declared kind")]
    KindMismatch { type_name: String, field: String },
}

/// Error while decoding JSON into Things.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JsonError {
    #[error("unexpected JSON token: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: &'static str,
    },

    #[error("field {type_name}.{field} expected {expected}")]
    InvalidField {
        type_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("open type value is missing its __typename discriminator")]
    MissingDiscriminator,

    #[error("unknown type {name:?}")]
    UnknownType { name: String },

    #[error("nesting depth exceeds maximum {max}")]
    DepthExceeded { max: usize },

    #[error("JSON parse failed: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for JsonError {
    fn from(e: serde_json::Error) -> Self {
        JsonError::Parse(e.to_string())
    }
}

/// Error raised by Space operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpaceError {
    #[error("node {0:?} is not live in this space")]
    UnknownNode(NodeId),

    #[error("unknown type {name:?}")]
    UnknownType { name: String },

    #[error("graph nesting depth exceeds maximum {max}")]
    DepthExceeded { max: usize },

    #[error("space did not settle after {rounds} rounds of reactions")]
    Unsettled { rounds: usize },
}
