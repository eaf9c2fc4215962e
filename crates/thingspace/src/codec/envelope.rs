//! Self-describing snapshot envelope for offline persistence.
//!
//! - Uncompressed: `THG1` magic + version byte + type name + Thing encoding
//! - Compressed: `THG1Z` magic + varint uncompressed size + zstd frame of the
//!   uncompressed form
//!
//! [`decode_snapshot`] detects both forms.

use std::io::Read;

use super::primitives::{Reader, Writer};
use super::thing::{decode_thing, encode_thing};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{FORMAT_VERSION, MAGIC_COMPRESSED, MAGIC_UNCOMPRESSED, MAX_SNAPSHOT_SIZE, MAX_STRING_LEN, MIN_FORMAT_VERSION};
use crate::model::Thing;
use crate::schema::Schema;

/// Options for encoding snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// zstd level; `None` writes the uncompressed form.
    pub compression_level: Option<i32>,
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compressed(level: i32) -> Self {
        Self {
            compression_level: Some(level),
        }
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encodes a Thing into a snapshot.
pub fn encode_snapshot(thing: &Thing, options: EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut writer = Writer::with_capacity(64);
    writer.write_bytes(MAGIC_UNCOMPRESSED);
    writer.write_byte(FORMAT_VERSION);
    writer.write_string(thing.type_name());
    encode_thing(&mut writer, thing)?;
    let uncompressed = writer.into_bytes();

    let Some(level) = options.compression_level else {
        return Ok(uncompressed);
    };
    let compressed = zstd::encode_all(uncompressed.as_slice(), level)
        .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;

    let mut writer = Writer::with_capacity(5 + 10 + compressed.len());
    writer.write_bytes(MAGIC_COMPRESSED);
    writer.write_varint(uncompressed.len() as u64);
    writer.write_bytes(&compressed);
    Ok(writer.into_bytes())
}

// =============================================================================
// DECODING
// =============================================================================

/// Decodes a snapshot, compressed or not.
pub fn decode_snapshot(schema: &Schema, input: &[u8]) -> Result<Thing, DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::UnexpectedEof { context: "magic" });
    }
    if input.len() >= 5 && &input[0..5] == MAGIC_COMPRESSED {
        let decompressed = decompress_zstd(&input[5..])?;
        decode_uncompressed(schema, &decompressed)
    } else {
        if input.len() > MAX_SNAPSHOT_SIZE {
            return Err(DecodeError::LengthExceedsLimit {
                field: "snapshot",
                len: input.len(),
                max: MAX_SNAPSHOT_SIZE,
            });
        }
        decode_uncompressed(schema, input)
    }
}

fn decode_uncompressed(schema: &Schema, input: &[u8]) -> Result<Thing, DecodeError> {
    let mut reader = Reader::new(input);
    let magic = reader.read_bytes(4, "magic")?;
    if magic != MAGIC_UNCOMPRESSED {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::InvalidMagic { found });
    }
    let version = reader.read_byte("version")?;
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    let type_name = reader.read_string(MAX_STRING_LEN, "type_name")?;
    let ty = schema
        .type_def(&type_name)
        .ok_or(DecodeError::UnknownType { name: type_name })?;
    decode_thing(&mut reader, schema, ty)
}

fn decompress_zstd(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut reader = Reader::new(compressed);
    let declared_size = reader.read_varint("uncompressed_size")? as usize;
    if declared_size > MAX_SNAPSHOT_SIZE {
        return Err(DecodeError::LengthExceedsLimit {
            field: "uncompressed_size",
            len: declared_size,
            max: MAX_SNAPSHOT_SIZE,
        });
    }

    let decoder = zstd::Decoder::new(reader.remaining())
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    // One byte past the declared size is enough to detect an overrun.
    let mut decompressed = Vec::with_capacity(declared_size);
    decoder
        .take(declared_size as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    if decompressed.len() != declared_size {
        return Err(DecodeError::UncompressedSizeMismatch {
            declared: declared_size,
            actual: decompressed.len(),
        });
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_snapshot_round_trip() {
        let schema = test_support::schema();
        let item = test_support::rich_item(&schema);
        let bytes = encode_snapshot(&item, EncodeOptions::new()).unwrap();
        assert_eq!(&bytes[0..4], MAGIC_UNCOMPRESSED);
        assert_eq!(decode_snapshot(&schema, &bytes).unwrap(), item);
    }

    #[test]
    fn test_compressed_round_trip() {
        let schema = test_support::schema();
        let item = test_support::rich_item(&schema);
        let bytes = encode_snapshot(&item, EncodeOptions::compressed(3)).unwrap();
        assert_eq!(&bytes[0..5], MAGIC_COMPRESSED);
        assert_eq!(decode_snapshot(&schema, &bytes).unwrap(), item);
    }

    #[test]
    fn test_invalid_magic() {
        let schema = test_support::schema();
        let result = decode_snapshot(&schema, b"NOPE\x01");
        assert!(matches!(result, Err(DecodeError::InvalidMagic { found }) if &found == b"NOPE"));
    }

    #[test]
    fn test_unsupported_version() {
        let schema = test_support::schema();
        let item = test_support::item(&schema, "1", None);
        let mut bytes = encode_snapshot(&item, EncodeOptions::new()).unwrap();
        bytes[4] = FORMAT_VERSION + 1;
        assert!(matches!(
            decode_snapshot(&schema, &bytes),
            Err(DecodeError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_unknown_type_name() {
        let schema = test_support::schema();
        let mut writer = Writer::new();
        writer.write_bytes(MAGIC_UNCOMPRESSED);
        writer.write_byte(FORMAT_VERSION);
        writer.write_string("Nobody");
        writer.write_byte(0);
        assert!(matches!(
            decode_snapshot(&schema, writer.as_bytes()),
            Err(DecodeError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_declared_size_mismatch() {
        let schema = test_support::schema();
        let item = test_support::item(&schema, "1", Some("v"));
        let plain = encode_snapshot(&item, EncodeOptions::new()).unwrap();
        let frame = zstd::encode_all(plain.as_slice(), 1).unwrap();
        let mut writer = Writer::new();
        writer.write_bytes(MAGIC_COMPRESSED);
        writer.write_varint(plain.len() as u64 + 7);
        writer.write_bytes(&frame);
        assert!(matches!(
            decode_snapshot(&schema, writer.as_bytes()),
            Err(DecodeError::UncompressedSizeMismatch { .. })
        ));
    }
}
