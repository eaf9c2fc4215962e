//! Field values and three-state presence.

use std::collections::BTreeMap;
use std::fmt;

use super::thing::{Equality, Thing};

/// Shared absent field, handed out for unknown field names.
pub static ABSENT: Field = Field::Absent;

/// A value of a closed enum.
///
/// Id 0 marks a dynamic value: a name the schema does not list, kept
/// verbatim so it survives a round trip through an older schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumValue {
    id: u32,
    name: String,
}

impl EnumValue {
    pub fn known(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dynamic(&self) -> bool {
        self.id == 0
    }
}

/// Sentinel for an open-typed value whose concrete type this schema does
/// not know.
///
/// The undecoded body is carried along so the value can be written back in
/// the format it arrived in. Equality and hashing look at the type name only.
#[derive(Debug, Clone)]
pub struct UnknownThing {
    type_name: String,
    payload: UnknownPayload,
}

/// Undecoded body of an [`UnknownThing`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum UnknownPayload {
    #[default]
    Empty,
    /// Object members other than the discriminator, as JSON text.
    Json(String),
    /// Nested Thing bytes from a writer that knows the type.
    Binary(Vec<u8>),
}

impl UnknownThing {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::with_payload(type_name, UnknownPayload::Empty)
    }

    pub fn with_payload(type_name: impl Into<String>, payload: UnknownPayload) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &UnknownPayload {
        &self.payload
    }
}

impl PartialEq for UnknownThing {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
    }
}

impl Eq for UnknownThing {}

impl std::hash::Hash for UnknownThing {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_name.hash(state);
    }
}

/// A present field value.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Enum(EnumValue),
    Thing(Thing),
    Unknown(UnknownThing),
    /// Elements may be null.
    List(Vec<Option<Value>>),
    /// Values may be null; keys are kept sorted.
    Map(BTreeMap<String, Option<Value>>),
}

impl Value {
    /// Builds a list with no null elements.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(|v| Some(v.into())).collect())
    }

    /// Builds a map with no null values.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Value::Thing(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Option<Value>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Option<Value>>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Compares two values under an equality mode; nested Things use the
    /// same mode.
    pub fn equals(&self, other: &Value, mode: Equality) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Thing(a), Value::Thing(b)) => a.equals(b, mode),
            (Value::Unknown(a), Value::Unknown(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| element_eq(x, y, mode))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, x), (kb, y))| ka == kb && element_eq(x, y, mode))
            }
            _ => false,
        }
    }

    pub(crate) fn hash_into<H: std::hash::Hasher>(&self, mode: Equality, state: &mut H) {
        use std::hash::Hash;

        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Double(x) => x.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Enum(e) => e.hash(state),
            Value::Thing(t) => t.hash_with(mode, state),
            Value::Unknown(u) => u.hash(state),
            Value::List(items) => {
                items.len().hash(state);
                for item in items {
                    hash_element(item, mode, state);
                }
            }
            Value::Map(entries) => {
                entries.len().hash(state);
                for (key, item) in entries {
                    key.hash(state);
                    hash_element(item, mode, state);
                }
            }
        }
    }
}

fn element_eq(a: &Option<Value>, b: &Option<Value>, mode: Equality) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x.equals(y, mode),
        _ => false,
    }
}

fn hash_element<H: std::hash::Hasher>(item: &Option<Value>, mode: Equality, state: &mut H) {
    use std::hash::Hash;

    match item {
        None => 0u8.hash(state),
        Some(value) => {
            1u8.hash(state);
            value.hash_into(mode, state);
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, Equality::State)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(x) => write!(f, "{x:?}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Enum(e) => f.write_str(e.name()),
            Value::Thing(t) => fmt::Debug::fmt(t, f),
            Value::Unknown(u) => write!(f, "<unknown {}>", u.type_name()),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => f.debug_map().entries(entries).finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<EnumValue> for Value {
    fn from(e: EnumValue) -> Self {
        Value::Enum(e)
    }
}

impl From<Thing> for Value {
    fn from(t: Thing) -> Self {
        Value::Thing(t)
    }
}

impl From<UnknownThing> for Value {
    fn from(u: UnknownThing) -> Self {
        Value::Unknown(u)
    }
}

/// Three-state field presence.
#[derive(Clone, Default)]
pub enum Field {
    /// Never fetched. Invisible to equality, hashing, JSON and the wire.
    #[default]
    Absent,
    /// Present and null.
    Null,
    Value(Value),
}

impl Field {
    pub fn from_option(value: Option<Value>) -> Self {
        value.map_or(Field::Null, Field::Value)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// True for present-null and present-value.
    pub fn is_declared(&self) -> bool {
        !self.is_absent()
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Compares with absent and null treated alike.
    pub fn equals(&self, other: &Field, mode: Equality) -> bool {
        match (self.value(), other.value()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.equals(b, mode),
            _ => false,
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Absent, Field::Absent) | (Field::Null, Field::Null) => true,
            (Field::Value(a), Field::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Absent => f.write_str("Absent"),
            Field::Null => f.write_str("Null"),
            Field::Value(v) => fmt::Debug::fmt(v, f),
        }
    }
}

impl<V: Into<Value>> From<V> for Field {
    fn from(value: V) -> Self {
        Field::Value(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_equality_by_bits() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
    }

    #[test]
    fn test_list_nulls_are_positional() {
        let a = Value::List(vec![Some(Value::Int(1)), None]);
        let b = Value::List(vec![None, Some(Value::Int(1))]);
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_field_presence() {
        assert!(Field::Absent.equals(&Field::Null, Equality::State));
        assert_ne!(Field::Absent, Field::Null);
        assert!(Field::from_option(None).is_null());
        assert!(Field::from(3).value().is_some());
    }

    #[test]
    fn test_enum_dynamic() {
        let e = EnumValue::dynamic("NEW_STATUS");
        assert!(e.is_dynamic());
        assert_eq!(e.name(), "NEW_STATUS");
        assert!(!EnumValue::known(2, "ARCHIVED").is_dynamic());
    }
}
