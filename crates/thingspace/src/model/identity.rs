//! Identity projection and identity hashing.
//!
//! A Thing's identity keeps only its identifying fields, with every
//! identifiable Thing reachable from those fields replaced by that Thing's
//! own identity. The idkey is the SHA-256 of the type name followed by the
//! canonical JSON of the identity.

use std::fmt;

use sha2::{Digest, Sha256};

use super::thing::Thing;
use super::value::{Field, Value};
use crate::json::{self, JsonOptions};

/// SHA-256 identity hash of a Thing.
///
/// `Debug` never prints the digest; call [`Idkey::to_hex`] explicitly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Idkey([u8; 32]);

impl Idkey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Idkey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex digest.
    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0F) as usize] as char);
    }
    out
}

impl fmt::Debug for Idkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Idkey(..)")
    }
}

impl Thing {
    /// Returns the identity projection. Idempotent; a Thing that already is
    /// its own identity returns itself.
    pub fn identity(&self) -> Thing {
        match self.identity_cell().get_or_init(|| project(self)) {
            Some(identity) => identity.clone(),
            None => self.clone(),
        }
    }

    /// Returns the memoized identity hash.
    pub fn idkey(&self) -> Idkey {
        *self.idkey_cell().get_or_init(|| compute_idkey(self))
    }
}

/// Builds the identity, or `None` when it would equal `thing`.
fn project(thing: &Thing) -> Option<Thing> {
    let ty = thing.type_def();
    let keep_all = !ty.is_identifiable();
    let mut changed = false;
    let mut fields = Vec::with_capacity(thing.fields().len());

    for (def, field) in ty.fields().iter().zip(thing.fields()) {
        if !keep_all && !def.is_identifying() {
            changed |= field.is_declared();
            fields.push(Field::Absent);
            continue;
        }
        match field {
            Field::Value(value) => match flatten(value) {
                Some(flat) => {
                    changed = true;
                    fields.push(Field::Value(flat));
                }
                None => fields.push(field.clone()),
            },
            other => fields.push(other.clone()),
        }
    }

    // Derivations are not re-run: the projection keeps identifying values
    // exactly as declared.
    changed.then(|| Thing::from_parts(ty.clone(), fields))
}

/// Replaces nested Things by their identities. `None` means unchanged.
fn flatten(value: &Value) -> Option<Value> {
    match value {
        Value::Thing(nested) => {
            let identity = nested.identity();
            (!Thing::ptr_eq(&identity, nested)).then_some(Value::Thing(identity))
        }
        Value::List(items) => {
            let mut out: Option<Vec<Option<Value>>> = None;
            for (i, item) in items.iter().enumerate() {
                if let Some(flat) = item.as_ref().and_then(flatten) {
                    out.get_or_insert_with(|| items.clone())[i] = Some(flat);
                }
            }
            out.map(Value::List)
        }
        Value::Map(entries) => {
            let mut out = None;
            for (key, item) in entries {
                if let Some(flat) = item.as_ref().and_then(flatten) {
                    out.get_or_insert_with(|| entries.clone())
                        .insert(key.clone(), Some(flat));
                }
            }
            out.map(Value::Map)
        }
        _ => None,
    }
}

fn compute_idkey(thing: &Thing) -> Idkey {
    let identity = thing.identity();
    let canonical = json::to_canonical_string(&json::to_json(&identity, &JsonOptions::canonical()));
    let mut hasher = Sha256::new();
    hasher.update(thing.type_name().as_bytes());
    hasher.update(canonical.as_bytes());
    Idkey(hasher.finalize().into())
}
