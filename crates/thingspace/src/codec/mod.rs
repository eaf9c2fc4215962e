//! Binary encoding of Things.
//!
//! [`compress`]/[`uncompress`] produce and read the bare bit-packed form
//! used on the wire. [`envelope`] wraps it with magic, version, type name
//! and optional zstd compression for storage.

pub mod envelope;
pub mod primitives;
pub mod thing;

pub use envelope::{EncodeOptions, decode_snapshot, encode_snapshot};
pub use primitives::{BitReader, BitWriter, Reader, Writer, zigzag_decode, zigzag_encode};
pub use thing::{decode_thing, encode_thing};

use crate::error::{DecodeError, EncodeError};
use crate::model::Thing;
use crate::schema::Schema;

/// Encodes a Thing without an envelope.
pub fn compress(thing: &Thing) -> Result<Vec<u8>, EncodeError> {
    let mut writer = Writer::new();
    encode_thing(&mut writer, thing)?;
    Ok(writer.into_bytes())
}

/// Decodes a bare Thing encoding of the named type.
pub fn uncompress(schema: &Schema, type_name: &str, input: &[u8]) -> Result<Thing, DecodeError> {
    let ty = schema.type_def(type_name).ok_or_else(|| DecodeError::UnknownType {
        name: type_name.to_string(),
    })?;
    decode_thing(&mut Reader::new(input), schema, ty)
}
