//! JSON emission and decoding.
//!
//! [`to_json`] emits declared fields only, with enums as their names and
//! open-typed values tagged by `__typename`. Two decoders produce identical
//! Things: [`from_value`] walks a parsed `serde_json::Value`, and
//! [`from_str`]/[`from_reader`] stream through serde without building the
//! tree first.

mod stream;

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::error::JsonError;
use crate::limits::{MAX_COLLECTION_LEN, MAX_DEPTH};
use crate::model::{EnumValue, Field, Thing, ThingBuilder, UnknownPayload, UnknownThing, Value};
use crate::schema::{FieldKind, Schema, TypeDef};

pub use stream::{from_reader, from_slice, from_str};

/// Key carrying the concrete type of an open-typed value.
pub const TYPENAME_KEY: &str = "__typename";

/// Options for JSON emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Emit dangerous fields. Off by default.
    pub include_dangerous: bool,
}

impl JsonOptions {
    /// Everything, dangerous values included. Used for identity hashing.
    pub fn canonical() -> Self {
        Self {
            include_dangerous: true,
        }
    }
}

// =============================================================================
// EMISSION
// =============================================================================

/// Converts a Thing into a JSON object.
pub fn to_json(thing: &Thing, options: &JsonOptions) -> Json {
    Json::Object(object(thing, options, false))
}

/// Converts a Thing into a sorted map of its emitted fields.
pub fn to_map(thing: &Thing, options: &JsonOptions) -> BTreeMap<String, Json> {
    object(thing, options, false).into_iter().collect()
}

fn object(thing: &Thing, options: &JsonOptions, tagged: bool) -> Map<String, Json> {
    let mut out = Map::new();
    if tagged {
        out.insert(TYPENAME_KEY.to_string(), Json::String(thing.type_name().to_string()));
    }
    for (def, field) in thing.declared() {
        if def.is_dangerous() && !options.include_dangerous {
            continue;
        }
        let json = match field.value() {
            Some(value) => value_json(value, def.kind(), options),
            None => Json::Null,
        };
        out.insert(def.name().to_string(), json);
    }
    out
}

fn value_json(value: &Value, kind: &FieldKind, options: &JsonOptions) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Double(x) => Json::from(*x),
        Value::Text(s) => Json::String(s.clone()),
        Value::Enum(e) => Json::String(e.name().to_string()),
        Value::Thing(thing) => {
            Json::Object(object(thing, options, matches!(kind, FieldKind::Open(_))))
        }
        Value::Unknown(unknown) => {
            let mut out = match unknown.payload() {
                UnknownPayload::Json(text) => serde_json::from_str::<Map<String, Json>>(text).unwrap_or_default(),
                _ => Map::new(),
            };
            out.insert(TYPENAME_KEY.to_string(), Json::String(unknown.type_name().to_string()));
            Json::Object(out)
        }
        Value::List(items) => {
            let element = element_kind(kind);
            Json::Array(
                items
                    .iter()
                    .map(|item| item.as_ref().map_or(Json::Null, |v| value_json(v, element, options)))
                    .collect(),
            )
        }
        Value::Map(entries) => {
            let element = element_kind(kind);
            Json::Object(
                entries
                    .iter()
                    .map(|(key, item)| {
                        let json = item.as_ref().map_or(Json::Null, |v| value_json(v, element, options));
                        (key.clone(), json)
                    })
                    .collect(),
            )
        }
    }
}

fn element_kind(kind: &FieldKind) -> &FieldKind {
    match kind {
        FieldKind::List(element) | FieldKind::Map(element) => element,
        other => other,
    }
}

/// Serializes JSON with object keys sorted at every level.
pub fn to_canonical_string(json: &Json) -> String {
    let mut out = String::new();
    write_canonical(json, &mut out);
    out
}

fn write_canonical(json: &Json, out: &mut String) {
    match json {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Json::String(key.clone()).to_string());
                out.push(':');
                if let Some(value) = map.get(key) {
                    write_canonical(value, out);
                }
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

// =============================================================================
// TREE DECODING
// =============================================================================

/// Decodes a parsed JSON tree into a Thing of the named type.
///
/// Unknown keys are ignored. Unknown open-type discriminators decode to the
/// unknown sentinel.
pub fn from_value(schema: &Schema, type_name: &str, json: &Json) -> Result<Thing, JsonError> {
    let ty = schema.type_def(type_name).ok_or_else(|| JsonError::UnknownType {
        name: type_name.to_string(),
    })?;
    match json {
        Json::Object(map) => thing_from_object(schema, ty, map, 0),
        other => Err(JsonError::UnexpectedToken {
            expected: "object",
            found: token_name(other),
        }),
    }
}

pub(crate) fn token_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn thing_from_object(
    schema: &Schema,
    ty: &std::sync::Arc<TypeDef>,
    map: &Map<String, Json>,
    depth: usize,
) -> Result<Thing, JsonError> {
    if depth > MAX_DEPTH {
        return Err(JsonError::DepthExceeded { max: MAX_DEPTH });
    }
    let mut builder = ThingBuilder::new(ty.clone());
    for (key, json) in map {
        let Some(idx) = ty.field_index(key) else {
            continue;
        };
        let def = &ty.fields()[idx];
        let ctx = FieldContext { ty, field: def.name() };
        let field = Field::from_option(element_from_json(schema, &ctx, def.kind(), json, depth)?);
        builder.put(idx, field);
    }
    Ok(builder.build_decoded())
}

/// Names the field being decoded, for error messages.
pub(crate) struct FieldContext<'a> {
    pub(crate) ty: &'a TypeDef,
    pub(crate) field: &'a str,
}

impl FieldContext<'_> {
    pub(crate) fn invalid(&self, kind: &FieldKind) -> JsonError {
        JsonError::InvalidField {
            type_name: self.ty.name().to_string(),
            field: self.field.to_string(),
            expected: kind.describe(),
        }
    }
}

/// Decodes one value; JSON null maps to `None`.
fn element_from_json(
    schema: &Schema,
    ctx: &FieldContext<'_>,
    kind: &FieldKind,
    json: &Json,
    depth: usize,
) -> Result<Option<Value>, JsonError> {
    if json.is_null() {
        return Ok(None);
    }
    let value = match (kind, json) {
        (FieldKind::Bool, Json::Bool(b)) => Value::Bool(*b),
        (FieldKind::Int, Json::Number(n)) => Value::Int(n.as_i64().ok_or_else(|| ctx.invalid(kind))?),
        (FieldKind::Double, Json::Number(n)) => Value::Double(n.as_f64().ok_or_else(|| ctx.invalid(kind))?),
        (FieldKind::Text, Json::String(s)) => Value::Text(s.clone()),
        (FieldKind::Enum(enum_name), Json::String(s)) => Value::Enum(enum_value(schema, enum_name, s)),
        (FieldKind::Thing(type_name), Json::Object(map)) => {
            let ty = schema.type_def(type_name).ok_or_else(|| JsonError::UnknownType {
                name: type_name.clone(),
            })?;
            Value::Thing(thing_from_object(schema, ty, map, depth + 1)?)
        }
        (FieldKind::Open(open_name), Json::Object(map)) => open_from_object(schema, open_name, map, depth)?,
        (FieldKind::List(element), Json::Array(items)) => {
            if items.len() > MAX_COLLECTION_LEN {
                return Err(ctx.invalid(kind));
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(element_from_json(schema, ctx, element, item, depth + 1)?);
            }
            Value::List(out)
        }
        (FieldKind::Map(element), Json::Object(map)) => {
            if map.len() > MAX_COLLECTION_LEN {
                return Err(ctx.invalid(kind));
            }
            let mut out = BTreeMap::new();
            for (key, item) in map {
                out.insert(key.clone(), element_from_json(schema, ctx, element, item, depth + 1)?);
            }
            Value::Map(out)
        }
        _ => return Err(ctx.invalid(kind)),
    };
    Ok(Some(value))
}

/// Resolves an enum name; unlisted names become dynamic values.
pub(crate) fn enum_value(schema: &Schema, enum_name: &str, name: &str) -> EnumValue {
    match schema.enum_def(enum_name).and_then(|e| e.id_of(name)) {
        Some(id) => EnumValue::known(id, name),
        None => EnumValue::dynamic(name),
    }
}

/// Decodes an open-typed object by its discriminator.
pub(crate) fn open_from_object(
    schema: &Schema,
    open_name: &str,
    map: &Map<String, Json>,
    depth: usize,
) -> Result<Value, JsonError> {
    let type_name = match map.get(TYPENAME_KEY) {
        Some(Json::String(name)) => name,
        _ => return Err(JsonError::MissingDiscriminator),
    };
    match schema.resolve_open(open_name, type_name) {
        Some(ty) => Ok(Value::Thing(thing_from_object(schema, ty, map, depth + 1)?)),
        None => {
            let mut rest = map.clone();
            rest.remove(TYPENAME_KEY);
            let payload = if rest.is_empty() {
                UnknownPayload::Empty
            } else {
                UnknownPayload::Json(Json::Object(rest).to_string())
            };
            Ok(Value::Unknown(UnknownThing::with_payload(type_name.as_str(), payload)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    #[test]
    fn test_emission_omits_absent_and_dangerous() {
        let schema = test_support::schema();
        let item = test_support::item(&schema, "1", None)
            .builder()
            .set("secret", "s3cret")
            .set_null("count")
            .build();
        let out = to_json(&item, &JsonOptions::default());
        assert_eq!(out["id"], json!("1"));
        assert_eq!(out["count"], Json::Null);
        assert!(out.get("val").is_none());
        assert!(out.get("secret").is_none());

        let full = to_json(&item, &JsonOptions::canonical());
        assert_eq!(full["secret"], json!("s3cret"));
    }

    #[test]
    fn test_round_trip_tree() {
        let schema = test_support::schema();
        let item = test_support::rich_item(&schema);
        let out = to_json(&item, &JsonOptions::canonical());
        let back = from_value(&schema, "Item", &out).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_open_type_tagging_and_unknown() {
        let schema = test_support::schema();
        let item = from_value(
            &schema,
            "Item",
            &json!({"id": "1", "attachment": {"__typename": "Video", "url": "x"}}),
        )
        .unwrap();
        assert!(matches!(item.get("attachment"), Some(Value::Unknown(u)) if u.type_name() == "Video"));
        assert_eq!(
            to_json(&item, &JsonOptions::default())["attachment"],
            json!({"__typename": "Video", "url": "x"})
        );

        let item = from_value(
            &schema,
            "Item",
            &json!({"id": "1", "attachment": {"__typename": "Image", "url": "x", "width": 3}}),
        )
        .unwrap();
        let image = item.get("attachment").and_then(Value::as_thing).unwrap();
        assert_eq!(image.type_name(), "Image");
        assert_eq!(to_json(&item, &JsonOptions::default())["attachment"]["__typename"], json!("Image"));
    }

    #[test]
    fn test_missing_discriminator_is_error() {
        let schema = test_support::schema();
        let result = from_value(&schema, "Item", &json!({"attachment": {"url": "x"}}));
        assert_eq!(result.unwrap_err(), JsonError::MissingDiscriminator);
    }

    #[test]
    fn test_non_object_start_is_error() {
        let schema = test_support::schema();
        assert!(matches!(
            from_value(&schema, "Item", &json!([1, 2])),
            Err(JsonError::UnexpectedToken { found: "array", .. })
        ));
    }

    #[test]
    fn test_wrong_kind_is_error() {
        let schema = test_support::schema();
        assert!(matches!(
            from_value(&schema, "Item", &json!({"count": "ten"})),
            Err(JsonError::InvalidField { .. })
        ));
        assert!(matches!(
            from_value(&schema, "Item", &json!({"count": 1.5})),
            Err(JsonError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_name_is_dynamic() {
        let schema = test_support::schema();
        let item = from_value(&schema, "Item", &json!({"status": "PAUSED"})).unwrap();
        let status = item.get("status").and_then(Value::as_enum).unwrap();
        assert!(status.is_dynamic());
        assert_eq!(status.name(), "PAUSED");
    }

    #[test]
    fn test_canonical_string_sorts_keys() {
        let out = to_canonical_string(&json!({"b": 1, "a": {"d": [true, null], "c": "x"}}));
        assert_eq!(out, r#"{"a":{"c":"x","d":[true,null]},"b":1}"#);
    }
}
