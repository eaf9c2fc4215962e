//! Bit-packed Thing encoding.
//!
//! Layout of one Thing:
//!
//! ```text
//! varint   field_count        wire fields known to the writer
//! varint   flags_len          omitted when field_count == 0
//! bytes    flags              per field, in compat id order:
//!                               declared
//!                               non_null        (if declared)
//!                               value           (bool fields)
//!                               non_empty       (list/map fields)
//!                               has_null        (non-empty list/map fields)
//! bytes    payload            non-null, non-bool fields in the same order
//! ```
//!
//! This layout is the versioned contract of format version 1. The
//! `flags_len` varint and the length prefix on nested Things are part of it:
//! they let a reader skip the flags and nested fields of a newer writer.
//! Compat ids only grow: a reader stops consulting flags at its own field
//! count and ignores trailing bits and bytes. Changing either prefix needs a
//! new `FORMAT_VERSION`.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::primitives::{BitReader, BitWriter, Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{MAX_COLLECTION_LEN, MAX_DEPTH, MAX_FIELDS, MAX_SNAPSHOT_SIZE, MAX_STRING_LEN};
use crate::model::{EnumValue, Field, Thing, ThingBuilder, UnknownPayload, UnknownThing, Value};
use crate::schema::{FieldDef, FieldKind, Schema, TypeDef};

// =============================================================================
// ENCODING
// =============================================================================

/// Names the field being written, for kind mismatch errors.
struct Site<'a> {
    ty: &'a TypeDef,
    field: &'a FieldDef,
}

impl Site<'_> {
    fn mismatch(&self) -> EncodeError {
        EncodeError::KindMismatch {
            type_name: self.ty.name().to_string(),
            field: self.field.name().to_string(),
        }
    }
}

/// Encodes a Thing without any envelope.
pub fn encode_thing(writer: &mut Writer, thing: &Thing) -> Result<(), EncodeError> {
    encode_at(writer, thing, 0)
}

fn encode_at(writer: &mut Writer, thing: &Thing, depth: usize) -> Result<(), EncodeError> {
    if depth > MAX_DEPTH {
        return Err(EncodeError::DepthExceeded { max: MAX_DEPTH });
    }
    let ty = thing.type_def();
    let order = ty.wire_order();
    writer.write_varint(order.len() as u64);
    if order.is_empty() {
        return Ok(());
    }

    let mut flags = BitWriter::with_capacity(order.len() * 2);
    let mut payload = Writer::new();
    for &idx in order {
        let site = Site {
            ty,
            field: &ty.fields()[idx],
        };
        match &thing.fields()[idx] {
            Field::Absent => flags.push(false),
            Field::Null => {
                flags.push(true);
                flags.push(false);
            }
            Field::Value(value) => {
                flags.push(true);
                flags.push(true);
                match (site.field.kind(), value) {
                    (FieldKind::Bool, Value::Bool(b)) => flags.push(*b),
                    (FieldKind::List(element), Value::List(items)) => {
                        flags.push(!items.is_empty());
                        if !items.is_empty() {
                            let has_null = items.iter().any(Option::is_none);
                            flags.push(has_null);
                            payload.write_varint(items.len() as u64);
                            write_list_items(&mut payload, element, items, has_null, &site, depth)?;
                        }
                    }
                    (FieldKind::Map(element), Value::Map(entries)) => {
                        flags.push(!entries.is_empty());
                        if !entries.is_empty() {
                            let has_null = entries.values().any(Option::is_none);
                            flags.push(has_null);
                            payload.write_varint(entries.len() as u64);
                            write_map_entries(&mut payload, element, entries, has_null, &site, depth)?;
                        }
                    }
                    (kind, value) => write_value(&mut payload, kind, value, &site, depth)?,
                }
            }
        }
    }

    let flags = flags.into_bytes();
    writer.write_varint(flags.len() as u64);
    writer.write_bytes(&flags);
    writer.write_bytes(payload.as_bytes());
    Ok(())
}

fn write_value(w: &mut Writer, kind: &FieldKind, value: &Value, site: &Site<'_>, depth: usize) -> Result<(), EncodeError> {
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(b)) => w.write_byte(u8::from(*b)),
        (FieldKind::Int, Value::Int(n)) => w.write_signed_varint(*n),
        (FieldKind::Double, Value::Double(x)) => w.write_f64(*x),
        (FieldKind::Text, Value::Text(s)) => {
            if s.len() > MAX_STRING_LEN {
                return Err(EncodeError::LengthExceedsLimit {
                    field: "text",
                    len: s.len(),
                    max: MAX_STRING_LEN,
                });
            }
            w.write_string(s);
        }
        (FieldKind::Enum(_), Value::Enum(e)) => {
            w.write_varint(u64::from(e.id()));
            if e.is_dynamic() {
                w.write_string(e.name());
            }
        }
        (FieldKind::Thing(type_name), Value::Thing(thing)) => {
            if thing.type_name() != type_name {
                return Err(site.mismatch());
            }
            write_nested(w, thing, depth)?;
        }
        (FieldKind::Open(_), Value::Thing(thing)) => {
            w.write_string(thing.type_name());
            write_nested(w, thing, depth)?;
        }
        (FieldKind::Open(_), Value::Unknown(unknown)) => {
            w.write_string(unknown.type_name());
            match unknown.payload() {
                UnknownPayload::Binary(bytes) => w.write_bytes_prefixed(bytes),
                // An empty Thing: zero fields.
                _ => w.write_bytes_prefixed(&[0]),
            }
        }
        (FieldKind::List(element), Value::List(items)) => {
            w.write_varint(items.len() as u64);
            if !items.is_empty() {
                let has_null = items.iter().any(Option::is_none);
                w.write_byte(u8::from(has_null));
                write_list_items(w, element, items, has_null, site, depth + 1)?;
            }
        }
        (FieldKind::Map(element), Value::Map(entries)) => {
            w.write_varint(entries.len() as u64);
            if !entries.is_empty() {
                let has_null = entries.values().any(Option::is_none);
                w.write_byte(u8::from(has_null));
                write_map_entries(w, element, entries, has_null, site, depth + 1)?;
            }
        }
        _ => return Err(site.mismatch()),
    }
    Ok(())
}

fn write_nested(w: &mut Writer, thing: &Thing, depth: usize) -> Result<(), EncodeError> {
    let mut nested = Writer::new();
    encode_at(&mut nested, thing, depth + 1)?;
    w.write_bytes_prefixed(nested.as_bytes());
    Ok(())
}

fn check_collection_len(len: usize) -> Result<(), EncodeError> {
    if len > MAX_COLLECTION_LEN {
        return Err(EncodeError::LengthExceedsLimit {
            field: "collection",
            len,
            max: MAX_COLLECTION_LEN,
        });
    }
    Ok(())
}

/// Writes the null bitmap (when needed) and the present elements. The
/// count is written by the caller.
fn write_list_items(
    w: &mut Writer,
    element: &FieldKind,
    items: &[Option<Value>],
    has_null: bool,
    site: &Site<'_>,
    depth: usize,
) -> Result<(), EncodeError> {
    check_collection_len(items.len())?;
    if has_null {
        let mut bitmap = BitWriter::with_capacity(items.len());
        for item in items {
            bitmap.push(item.is_some());
        }
        w.write_bytes(&bitmap.into_bytes());
    }
    for item in items.iter().flatten() {
        write_value(w, element, item, site, depth)?;
    }
    Ok(())
}

fn write_map_entries(
    w: &mut Writer,
    element: &FieldKind,
    entries: &BTreeMap<String, Option<Value>>,
    has_null: bool,
    site: &Site<'_>,
    depth: usize,
) -> Result<(), EncodeError> {
    check_collection_len(entries.len())?;
    if has_null {
        let mut bitmap = BitWriter::with_capacity(entries.len());
        for item in entries.values() {
            bitmap.push(item.is_some());
        }
        w.write_bytes(&bitmap.into_bytes());
    }
    for (key, item) in entries {
        w.write_string(key);
        if let Some(value) = item {
            write_value(w, element, value, site, depth)?;
        }
    }
    Ok(())
}

// =============================================================================
// DECODING
// =============================================================================

/// Decodes a Thing of type `ty` without any envelope. Pure derivations left
/// off the wire are recomputed; everything else keeps its decoded value.
pub fn decode_thing(reader: &mut Reader<'_>, schema: &Schema, ty: &Arc<TypeDef>) -> Result<Thing, DecodeError> {
    decode_at(reader, schema, ty, 0)
}

fn decode_at(reader: &mut Reader<'_>, schema: &Schema, ty: &Arc<TypeDef>, depth: usize) -> Result<Thing, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { max: MAX_DEPTH });
    }
    let mut builder = ThingBuilder::new(ty.clone());
    let count = reader.read_len(MAX_FIELDS, "field_count")?;
    if count == 0 {
        return Ok(builder.build_decoded());
    }
    let flags_len = reader.read_len(MAX_FIELDS, "flags_len")?;
    if flags_len * 8 < count {
        return Err(DecodeError::MalformedEncoding {
            context: "flags shorter than field count",
        });
    }
    let mut bits = BitReader::new(reader.read_bytes(flags_len, "flags")?);

    for &idx in ty.wire_order().iter().take(count) {
        let def = &ty.fields()[idx];
        if !bits.read_bit("declared")? {
            continue;
        }
        if !bits.read_bit("non_null")? {
            builder.put(idx, Field::Null);
            continue;
        }
        let value = match def.kind() {
            FieldKind::Bool => Value::Bool(bits.read_bit("bool")?),
            FieldKind::List(element) => {
                if bits.read_bit("non_empty")? {
                    let has_null = bits.read_bit("has_null")?;
                    let count = reader.read_len(MAX_COLLECTION_LEN, "list")?;
                    Value::List(read_list_items(reader, schema, element, count, has_null, depth)?)
                } else {
                    Value::List(Vec::new())
                }
            }
            FieldKind::Map(element) => {
                if bits.read_bit("non_empty")? {
                    let has_null = bits.read_bit("has_null")?;
                    let count = reader.read_len(MAX_COLLECTION_LEN, "map")?;
                    Value::Map(read_map_entries(reader, schema, element, count, has_null, depth)?)
                } else {
                    Value::Map(BTreeMap::new())
                }
            }
            kind => read_value(reader, schema, kind, depth)?,
        };
        builder.put(idx, Field::Value(value));
    }
    Ok(builder.build_decoded())
}

fn read_value(reader: &mut Reader<'_>, schema: &Schema, kind: &FieldKind, depth: usize) -> Result<Value, DecodeError> {
    let value = match kind {
        FieldKind::Bool => Value::Bool(reader.read_bool("bool")?),
        FieldKind::Int => Value::Int(reader.read_signed_varint("int")?),
        FieldKind::Double => Value::Double(reader.read_f64("double")?),
        FieldKind::Text => Value::Text(reader.read_string(MAX_STRING_LEN, "text")?),
        FieldKind::Enum(enum_name) => Value::Enum(read_enum(reader, schema, enum_name)?),
        FieldKind::Thing(type_name) => {
            let ty = schema.type_def(type_name).ok_or_else(|| DecodeError::UnknownType {
                name: type_name.clone(),
            })?;
            Value::Thing(read_nested(reader, schema, ty, depth)?)
        }
        FieldKind::Open(open_name) => {
            let type_name = reader.read_string(MAX_STRING_LEN, "type_name")?;
            match schema.resolve_open(open_name, &type_name) {
                Some(ty) => Value::Thing(read_nested(reader, schema, ty, depth)?),
                None => {
                    let body = reader.read_bytes_prefixed(MAX_SNAPSHOT_SIZE, "thing")?;
                    let payload = UnknownPayload::Binary(body.to_vec());
                    Value::Unknown(UnknownThing::with_payload(type_name, payload))
                }
            }
        }
        FieldKind::List(element) => {
            let count = reader.read_len(MAX_COLLECTION_LEN, "list")?;
            let has_null = count > 0 && reader.read_bool("has_null")?;
            Value::List(read_list_items(reader, schema, element, count, has_null, depth + 1)?)
        }
        FieldKind::Map(element) => {
            let count = reader.read_len(MAX_COLLECTION_LEN, "map")?;
            let has_null = count > 0 && reader.read_bool("has_null")?;
            Value::Map(read_map_entries(reader, schema, element, count, has_null, depth + 1)?)
        }
    };
    Ok(value)
}

fn read_enum(reader: &mut Reader<'_>, schema: &Schema, enum_name: &str) -> Result<EnumValue, DecodeError> {
    let id = reader.read_varint("enum")?;
    if id == 0 {
        return Ok(EnumValue::dynamic(reader.read_string(MAX_STRING_LEN, "enum")?));
    }
    let unknown = || DecodeError::UnknownEnumId {
        enum_name: enum_name.to_string(),
        id,
    };
    let id = u32::try_from(id).map_err(|_| unknown())?;
    let name = schema
        .enum_def(enum_name)
        .and_then(|e| e.name_of(id))
        .ok_or_else(unknown)?;
    Ok(EnumValue::known(id, name))
}

fn read_nested(reader: &mut Reader<'_>, schema: &Schema, ty: &Arc<TypeDef>, depth: usize) -> Result<Thing, DecodeError> {
    let bytes = reader.read_bytes_prefixed(MAX_SNAPSHOT_SIZE, "thing")?;
    decode_at(&mut Reader::new(bytes), schema, ty, depth + 1)
}

fn read_presence(reader: &mut Reader<'_>, count: usize, has_null: bool) -> Result<Vec<bool>, DecodeError> {
    if !has_null {
        return Ok(vec![true; count]);
    }
    let mut bits = BitReader::new(reader.read_bytes(count.div_ceil(8), "null_bitmap")?);
    (0..count).map(|_| bits.read_bit("null_bitmap")).collect()
}

fn read_list_items(
    reader: &mut Reader<'_>,
    schema: &Schema,
    element: &FieldKind,
    count: usize,
    has_null: bool,
    depth: usize,
) -> Result<Vec<Option<Value>>, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { max: MAX_DEPTH });
    }
    let presence = read_presence(reader, count, has_null)?;
    let mut items = Vec::with_capacity(count.min(reader.remaining_len()));
    for present in presence {
        items.push(if present {
            Some(read_value(reader, schema, element, depth)?)
        } else {
            None
        });
    }
    Ok(items)
}

fn read_map_entries(
    reader: &mut Reader<'_>,
    schema: &Schema,
    element: &FieldKind,
    count: usize,
    has_null: bool,
    depth: usize,
) -> Result<BTreeMap<String, Option<Value>>, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { max: MAX_DEPTH });
    }
    let presence = read_presence(reader, count, has_null)?;
    let mut entries = BTreeMap::new();
    for present in presence {
        let key = reader.read_string(MAX_STRING_LEN, "map_key")?;
        let value = if present {
            Some(read_value(reader, schema, element, depth)?)
        } else {
            None
        };
        entries.insert(key, value);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compress, uncompress};
    use crate::schema::{FieldDef, Schema};
    use crate::test_support;

    #[test]
    fn test_zero_field_type_is_one_byte() {
        let schema = test_support::schema();
        let empty = schema.builder_for("Empty").unwrap().build();
        let bytes = compress(&empty).unwrap();
        assert_eq!(bytes, vec![0x00]);
        let back = uncompress(&schema, "Empty", &bytes).unwrap();
        assert_eq!(back, empty);
    }

    #[test]
    fn test_flag_layout() {
        let schema = Schema::builder()
            .thing("Flags", |t| t
                .field(FieldDef::boolean("on", 1))
                .field(FieldDef::text("gone", 2))
                .field(FieldDef::int("nothing", 3)))
            .build()
            .unwrap();
        let thing = schema.builder_for("Flags").unwrap().set("on", true).set_null("nothing").build();
        // field count, flags_len, then the flags
        // on: declared, non-null, true; gone: absent; nothing: declared, null
        assert_eq!(compress(&thing).unwrap(), vec![3, 1, 0b0001_0111]);
    }

    #[test]
    fn test_nested_fields_of_newer_writer_are_skipped() {
        let older = Schema::builder()
            .thing("Tag", |t| t.field(FieldDef::text("name", 1)))
            .thing("Post", |t| t.field(FieldDef::thing("tag", "Tag", 1)).field(FieldDef::int("n", 2)))
            .build()
            .unwrap();
        let newer = Schema::builder()
            .thing("Tag", |t| t
                .field(FieldDef::text("name", 1))
                .field(FieldDef::list("aliases", FieldKind::Text, 2))
                .field(FieldDef::int("weight", 3)))
            .thing("Post", |t| t.field(FieldDef::thing("tag", "Tag", 1)).field(FieldDef::int("n", 2)))
            .build()
            .unwrap();
        let tag = newer
            .builder_for("Tag")
            .unwrap()
            .set("name", "rust")
            .set("aliases", Value::list(["rs", "rustlang"]))
            .set("weight", 9)
            .build();
        let post = newer.builder_for("Post").unwrap().set("tag", tag).set("n", 3).build();

        let back = uncompress(&older, "Post", &compress(&post).unwrap()).unwrap();
        let tag = back.get("tag").and_then(Value::as_thing).unwrap();
        assert_eq!(tag.get("name").and_then(Value::as_text), Some("rust"));
        assert_eq!(back.get("n").and_then(Value::as_int), Some(3));
    }

    #[test]
    fn test_round_trip_rich_item() {
        let schema = test_support::schema();
        let item = test_support::rich_item(&schema);
        let bytes = compress(&item).unwrap();
        let back = uncompress(&schema, "Item", &bytes).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_derived_fields_stay_off_the_wire() {
        let schema = test_support::schema();
        let item = test_support::item(&schema, "bar", Some("foo"));
        let plain = item.builder().unset("derived_first_available").unset("id_derived");
        let with = compress(&item).unwrap();
        let without = compress(&plain.build()).unwrap();
        assert_eq!(with, without);
        let back = uncompress(&schema, "Item", &with).unwrap();
        assert_eq!(back.get("derived_first_available").and_then(Value::as_text), Some("foo"));
    }

    #[test]
    fn test_unknown_enum_id_is_fatal() {
        let schema = test_support::schema();
        let item = schema
            .builder_for("Item")
            .unwrap()
            .set("status", EnumValue::known(9, "FUTURE"))
            .build();
        let bytes = compress(&item).unwrap();
        assert!(matches!(
            uncompress(&schema, "Item", &bytes),
            Err(DecodeError::UnknownEnumId { id: 9, .. })
        ));
    }

    #[test]
    fn test_unknown_open_member_decodes_to_sentinel() {
        let writer_schema = Schema::builder()
            .thing("Clip", |t| t.field(FieldDef::text("url", 1)))
            .thing("Post", |t| t.field(FieldDef::open("media", "Media", 1)).field(FieldDef::int("n", 2)))
            .interface("Media", ["Clip"])
            .build()
            .unwrap();
        let reader_schema = Schema::builder()
            .thing("Clip", |t| t.field(FieldDef::text("url", 1)))
            .thing("Post", |t| t.field(FieldDef::open("media", "Media", 1)).field(FieldDef::int("n", 2)))
            .interface("Media", Vec::<&str>::new())
            .build()
            .unwrap();
        let clip = writer_schema.builder_for("Clip").unwrap().set("url", "x").build();
        let post = writer_schema.builder_for("Post").unwrap().set("media", clip).set("n", 7).build();
        let back = uncompress(&reader_schema, "Post", &compress(&post).unwrap()).unwrap();
        assert!(matches!(back.get("media"), Some(Value::Unknown(u)) if u.type_name() == "Clip"));
        assert_eq!(back.get("n").and_then(Value::as_int), Some(7));

        // Re-encoding keeps the body for readers that know the type.
        let forwarded = compress(&back).unwrap();
        let restored = uncompress(&writer_schema, "Post", &forwarded).unwrap();
        assert_eq!(restored, post);
        assert_eq!(forwarded, compress(&post).unwrap());
    }

    #[test]
    fn test_kind_mismatch_on_encode() {
        let schema = test_support::schema();
        let mut builder = schema.builder_for("Item").unwrap();
        let idx = builder.type_def().field_index("count").unwrap();
        builder.put(idx, Field::from("not a number"));
        assert!(matches!(
            compress(&builder.build()),
            Err(EncodeError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let schema = test_support::schema();
        let bytes = compress(&test_support::rich_item(&schema)).unwrap();
        for cut in [1, bytes.len() / 2, bytes.len() - 1] {
            assert!(uncompress(&schema, "Item", &bytes[..cut]).is_err(), "cut at {cut}");
        }
    }
}
