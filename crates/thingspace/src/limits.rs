//! Security limits and format constants.
//!
//! Decoders treat their input as untrusted; every allocation driven by a
//! length read from the wire is bounded by one of these.

/// Magic bytes of an uncompressed snapshot envelope.
pub const MAGIC_UNCOMPRESSED: &[u8; 4] = b"THG1";

/// Magic bytes of a zstd-compressed snapshot envelope.
pub const MAGIC_COMPRESSED: &[u8; 5] = b"THG1Z";

/// Current envelope format version.
pub const FORMAT_VERSION: u8 = 1;

/// Oldest envelope format version still accepted.
pub const MIN_FORMAT_VERSION: u8 = 1;

/// Maximum bytes in a varint (64-bit LEB128).
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum length of a text value or type name, in bytes.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Maximum number of elements in a list or entries in a map.
pub const MAX_COLLECTION_LEN: usize = 1_000_000;

/// Maximum field count accepted in a Thing header.
pub const MAX_FIELDS: usize = 4096;

/// Maximum nesting depth of Things and collections.
pub const MAX_DEPTH: usize = 128;

/// Maximum size of a decoded snapshot, compressed or not.
pub const MAX_SNAPSHOT_SIZE: usize = 64 * 1024 * 1024;
