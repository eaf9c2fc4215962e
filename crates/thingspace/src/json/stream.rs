//! Streaming JSON decoder built on serde's `DeserializeSeed`.
//!
//! Walks the token stream directly into a [`ThingBuilder`]. Open-typed
//! values are buffered into a small `serde_json::Map` because their
//! discriminator may arrive after the other keys.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Unexpected, Visitor};
use serde_json::{Map, Value as Json};

use super::{FieldContext, enum_value, open_from_object};
use crate::error::JsonError;
use crate::limits::{MAX_COLLECTION_LEN, MAX_DEPTH};
use crate::model::{Field, Thing, ThingBuilder, Value};
use crate::schema::{FieldKind, Schema, TypeDef};

/// Decodes a Thing of the named type from a JSON string.
pub fn from_str(schema: &Schema, type_name: &str, input: &str) -> Result<Thing, JsonError> {
    let mut de = serde_json::Deserializer::from_str(input);
    let thing = decode(schema, type_name, &mut de)?;
    de.end()?;
    Ok(thing)
}

/// Decodes a Thing of the named type from JSON bytes.
pub fn from_slice(schema: &Schema, type_name: &str, input: &[u8]) -> Result<Thing, JsonError> {
    let mut de = serde_json::Deserializer::from_slice(input);
    let thing = decode(schema, type_name, &mut de)?;
    de.end()?;
    Ok(thing)
}

/// Decodes a Thing of the named type from a reader.
pub fn from_reader<R: io::Read>(schema: &Schema, type_name: &str, reader: R) -> Result<Thing, JsonError> {
    let mut de = serde_json::Deserializer::from_reader(reader);
    let thing = decode(schema, type_name, &mut de)?;
    de.end()?;
    Ok(thing)
}

fn decode<'de, D>(schema: &Schema, type_name: &str, de: D) -> Result<Thing, JsonError>
where
    D: Deserializer<'de, Error = serde_json::Error>,
{
    let ty = schema.type_def(type_name).ok_or_else(|| JsonError::UnknownType {
        name: type_name.to_string(),
    })?;
    Ok(ThingSeed { schema, ty, depth: 0 }.deserialize(de)?)
}

struct ThingSeed<'s> {
    schema: &'s Schema,
    ty: &'s Arc<TypeDef>,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ThingSeed<'_> {
    type Value = Thing;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Thing, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ThingSeed<'_> {
    type Value = Thing;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a JSON object for type {}", self.ty.name())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Thing, A::Error> {
        if self.depth > MAX_DEPTH {
            return Err(de::Error::custom(JsonError::DepthExceeded { max: MAX_DEPTH }));
        }
        let mut builder = ThingBuilder::new(self.ty.clone());
        while let Some(key) = map.next_key::<String>()? {
            match self.ty.field_index(&key) {
                Some(idx) => {
                    let def = &self.ty.fields()[idx];
                    let value = map.next_value_seed(ValueSeed {
                        schema: self.schema,
                        ctx: FieldContext {
                            ty: self.ty,
                            field: def.name(),
                        },
                        kind: def.kind(),
                        depth: self.depth,
                    })?;
                    builder.put(idx, Field::from_option(value));
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(builder.build_decoded())
    }
}

/// Decodes one value of a known kind; JSON null maps to `None`.
struct ValueSeed<'s> {
    schema: &'s Schema,
    ctx: FieldContext<'s>,
    kind: &'s FieldKind,
    depth: usize,
}

impl<'s> ValueSeed<'s> {
    fn nested(&self, kind: &'s FieldKind) -> ValueSeed<'s> {
        ValueSeed {
            schema: self.schema,
            ctx: FieldContext {
                ty: self.ctx.ty,
                field: self.ctx.field,
            },
            kind,
            depth: self.depth + 1,
        }
    }

    fn invalid<E: de::Error>(&self) -> E {
        E::custom(self.ctx.invalid(self.kind))
    }
}

impl<'de> DeserializeSeed<'de> for ValueSeed<'_> {
    type Value = Option<Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Option<Value>, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for ValueSeed<'_> {
    type Value = Option<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.describe())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Option<Value>, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Option<Value>, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Option<Value>, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Option<Value>, E> {
        match self.kind {
            FieldKind::Bool => Ok(Some(Value::Bool(b))),
            _ => Err(self.invalid()),
        }
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Option<Value>, E> {
        match self.kind {
            FieldKind::Int => Ok(Some(Value::Int(n))),
            FieldKind::Double => Ok(Some(Value::Double(n as f64))),
            _ => Err(self.invalid()),
        }
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Option<Value>, E> {
        match self.kind {
            FieldKind::Int => i64::try_from(n)
                .map(|n| Some(Value::Int(n)))
                .map_err(|_| E::invalid_value(Unexpected::Unsigned(n), &self)),
            FieldKind::Double => Ok(Some(Value::Double(n as f64))),
            _ => Err(self.invalid()),
        }
    }

    fn visit_f64<E: de::Error>(self, x: f64) -> Result<Option<Value>, E> {
        match self.kind {
            FieldKind::Double => Ok(Some(Value::Double(x))),
            _ => Err(self.invalid()),
        }
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Option<Value>, E> {
        match self.kind {
            FieldKind::Text => Ok(Some(Value::Text(s.to_string()))),
            FieldKind::Enum(enum_name) => Ok(Some(Value::Enum(enum_value(self.schema, enum_name, s)))),
            _ => Err(self.invalid()),
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Option<Value>, A::Error> {
        let FieldKind::List(element) = self.kind else {
            return Err(self.invalid());
        };
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element_seed(self.nested(element))? {
            if items.len() == MAX_COLLECTION_LEN {
                return Err(self.invalid());
            }
            items.push(item);
        }
        Ok(Some(Value::List(items)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Option<Value>, A::Error> {
        match self.kind {
            FieldKind::Thing(type_name) => {
                let ty = self.schema.type_def(type_name).ok_or_else(|| {
                    <A::Error as de::Error>::custom(JsonError::UnknownType {
                        name: type_name.clone(),
                    })
                })?;
                let seed = ThingSeed {
                    schema: self.schema,
                    ty,
                    depth: self.depth + 1,
                };
                seed.visit_map(map).map(|thing| Some(Value::Thing(thing)))
            }
            FieldKind::Map(element) => {
                let mut entries = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    if entries.len() == MAX_COLLECTION_LEN {
                        return Err(self.invalid());
                    }
                    let item = map.next_value_seed(self.nested(element))?;
                    entries.insert(key, item);
                }
                Ok(Some(Value::Map(entries)))
            }
            FieldKind::Open(open_name) => {
                let mut buffered = Map::new();
                while let Some((key, value)) = map.next_entry::<String, Json>()? {
                    buffered.insert(key, value);
                }
                open_from_object(self.schema, open_name, &buffered, self.depth)
                    .map(Some)
                    .map_err(<A::Error as de::Error>::custom)
            }
            _ => Err(self.invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::{JsonOptions, from_value, to_json};
    use crate::test_support;

    #[test]
    fn test_stream_matches_tree() {
        let schema = test_support::schema();
        let item = test_support::rich_item(&schema);
        let text = to_json(&item, &JsonOptions::canonical()).to_string();

        let streamed = from_str(&schema, "Item", &text).unwrap();
        let tree = from_value(&schema, "Item", &serde_json::from_str(&text).unwrap()).unwrap();
        assert_eq!(streamed, tree);
        assert_eq!(streamed, item);

        let from_bytes = from_reader(&schema, "Item", text.as_bytes()).unwrap();
        assert_eq!(from_bytes, item);
    }

    #[test]
    fn test_stream_ignores_unknown_keys() {
        let schema = test_support::schema();
        let item = from_str(&schema, "Item", r#"{"id":"1","extra":{"deep":[1,2,3]},"val":"x"}"#).unwrap();
        assert_eq!(item.get("val").and_then(Value::as_text), Some("x"));
    }

    #[test]
    fn test_stream_rejects_non_object() {
        let schema = test_support::schema();
        assert!(matches!(from_str(&schema, "Item", "\"text\""), Err(JsonError::Parse(_))));
        assert!(matches!(from_str(&schema, "Item", "{\"id\":"), Err(JsonError::Parse(_))));
    }

    #[test]
    fn test_stream_open_type_unknown() {
        let schema = test_support::schema();
        let item = from_str(&schema, "Item", r#"{"attachment":{"url":"x","__typename":"Video"}}"#).unwrap();
        assert!(matches!(item.get("attachment"), Some(Value::Unknown(_))));
        let tree = from_value(&schema, "Item", &to_json(&item, &JsonOptions::default())).unwrap();
        assert_eq!(tree.get("attachment"), item.get("attachment"));
        assert_eq!(to_json(&tree, &JsonOptions::default())["attachment"]["url"], "x");
    }

    #[test]
    fn test_stream_nulls_in_collections() {
        let schema = test_support::schema();
        let item = from_str(&schema, "Item", r#"{"tags":["a",null],"attrs":{"x":null,"y":2}}"#).unwrap();
        let tags = item.get("tags").and_then(Value::as_list).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags[1].is_none());
        let attrs = item.get("attrs").and_then(Value::as_map).unwrap();
        assert!(attrs["x"].is_none());
        assert_eq!(attrs["y"], Some(Value::Int(2)));
    }
}
