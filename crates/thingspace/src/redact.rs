//! Reversible redaction of dangerous fields.
//!
//! [`redact`] rewrites every leaf under a dangerous field through a
//! [`Redactor`]; [`unredact`] applies the inverse. Fields that cannot reach
//! dangerous data are copied untouched, and Things of types that are never
//! dangerous-capable are returned as-is.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::model::identity::hex;
use crate::model::{EnumValue, Field, Thing, ThingBuilder, Value};

/// Reversible transform for dangerous leaf values.
pub trait Redactor {
    fn redact(&self, value: &Value) -> Value;
    fn unredact(&self, value: &Value) -> Value;
}

/// Prefix marking redacted text.
pub const REDACTED_PREFIX: &str = "redacted:";

/// XORs leaves with a SHA-256 keystream derived from a secret.
///
/// Text becomes `redacted:` followed by hex; numbers and booleans keep
/// their kind. Enum values become dynamic values named `redacted:` plus the
/// hex of `id:name`, which stay valid on the wire and in JSON.
#[derive(Clone)]
pub struct KeyedRedactor {
    key: [u8; 32],
}

impl KeyedRedactor {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: Sha256::digest(secret.as_ref()).into(),
        }
    }

    fn keystream(&self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len + 32);
        let mut counter = 0u64;
        while out.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(len);
        out
    }

    fn mask(&self) -> u64 {
        let stream = self.keystream(8);
        let mut word = [0u8; 8];
        word.copy_from_slice(&stream);
        u64::from_le_bytes(word)
    }

    fn xor(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().zip(self.keystream(bytes.len())).map(|(b, k)| b ^ k).collect()
    }

    fn seal(&self, plain: &str) -> String {
        format!("{REDACTED_PREFIX}{}", hex(&self.xor(plain.as_bytes())))
    }

    fn open(&self, sealed: &str) -> Option<String> {
        let bytes = unhex(sealed.strip_prefix(REDACTED_PREFIX)?)?;
        String::from_utf8(self.xor(&bytes)).ok()
    }

    fn restore_enum(&self, value: &EnumValue) -> Option<EnumValue> {
        if !value.is_dynamic() {
            return None;
        }
        let plain = self.open(value.name())?;
        let (id, name) = plain.split_once(':')?;
        Some(match id.parse::<u32>().ok()? {
            0 => EnumValue::dynamic(name),
            id => EnumValue::known(id, name),
        })
    }

    fn scramble(&self, value: &Value) -> Option<Value> {
        let mask = self.mask();
        Some(match value {
            Value::Bool(b) => Value::Bool(*b ^ (mask & 1 == 1)),
            Value::Int(n) => Value::Int(n ^ mask as i64),
            Value::Double(x) => Value::Double(f64::from_bits(x.to_bits() ^ mask)),
            _ => return None,
        })
    }
}

impl Redactor for KeyedRedactor {
    fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Text(s) => Value::Text(self.seal(s)),
            Value::Enum(e) => Value::Enum(EnumValue::dynamic(self.seal(&format!("{}:{}", e.id(), e.name())))),
            other => self.scramble(other).unwrap_or_else(|| other.clone()),
        }
    }

    fn unredact(&self, value: &Value) -> Value {
        match value {
            Value::Text(s) => match self.open(s) {
                Some(text) => Value::Text(text),
                None => value.clone(),
            },
            Value::Enum(e) => match self.restore_enum(e) {
                Some(restored) => Value::Enum(restored),
                None => value.clone(),
            },
            other => self.scramble(other).unwrap_or_else(|| other.clone()),
        }
    }
}

impl fmt::Debug for KeyedRedactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyedRedactor(..)")
    }
}

fn unhex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    fn nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    }
    s.as_bytes()
        .chunks_exact(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

#[derive(Clone, Copy)]
enum Direction {
    Redact,
    Unredact,
}

impl Direction {
    fn apply(self, redactor: &dyn Redactor, value: &Value) -> Value {
        match self {
            Direction::Redact => redactor.redact(value),
            Direction::Unredact => redactor.unredact(value),
        }
    }
}

/// Rewrites every dangerous leaf of `thing`.
pub fn redact(thing: &Thing, redactor: &dyn Redactor) -> Thing {
    rewrite(thing, redactor, Direction::Redact, false)
}

/// Inverse of [`redact`] for the same redactor.
pub fn unredact(thing: &Thing, redactor: &dyn Redactor) -> Thing {
    rewrite(thing, redactor, Direction::Unredact, false)
}

impl Thing {
    pub fn redact(&self, redactor: &dyn Redactor) -> Thing {
        redact(self, redactor)
    }

    pub fn unredact(&self, redactor: &dyn Redactor) -> Thing {
        unredact(self, redactor)
    }
}

/// `all` scrubs every leaf: set under a dangerous field.
fn rewrite(thing: &Thing, redactor: &dyn Redactor, dir: Direction, all: bool) -> Thing {
    let ty = thing.type_def();
    if !all && !ty.is_dangerous_capable() {
        return thing.clone();
    }
    let mut fields = thing.fields().to_vec();
    for (def, field) in ty.fields().iter().zip(fields.iter_mut()) {
        let Field::Value(value) = field else {
            continue;
        };
        let scrub = all || def.is_dangerous();
        if scrub || def.reaches_dangerous() {
            *value = rewrite_value(value, redactor, dir, scrub);
        }
    }
    // Derived values are kept as stored so the round trip is exact.
    ThingBuilder::from_fields(ty.clone(), fields).build_raw()
}

fn rewrite_value(value: &Value, redactor: &dyn Redactor, dir: Direction, all: bool) -> Value {
    match value {
        Value::Thing(thing) => Value::Thing(rewrite(thing, redactor, dir, all)),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| item.as_ref().map(|v| rewrite_value(v, redactor, dir, all)))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, item)| (k.clone(), item.as_ref().map(|v| rewrite_value(v, redactor, dir, all))))
                .collect(),
        ),
        Value::Unknown(_) => value.clone(),
        leaf if all => dir.apply(redactor, leaf),
        leaf => leaf.clone(),
    }
}
