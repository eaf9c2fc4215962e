//! Immutable Thing/Action values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHasher;

use super::builder::ThingBuilder;
use super::identity::Idkey;
use super::value::{ABSENT, Field, Value};
use crate::schema::{FieldDef, TypeDef};

/// How two Things are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Equality {
    /// Identifying fields only. Types without identifying fields compare
    /// all fields.
    Identity,
    /// All fields; absent compares equal to null.
    State,
    /// Only fields declared on both sides.
    StateDeclared,
}

/// A built, immutable Thing or Action.
///
/// Cloning is a reference-count bump. The identity projection and the
/// idkey are computed lazily and memoized per instance.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<ThingInner>,
}

struct ThingInner {
    ty: Arc<TypeDef>,
    fields: Box<[Field]>,
    identity: OnceLock<Option<Thing>>,
    idkey: OnceLock<Idkey>,
}

impl Thing {
    /// Wraps already-derived fields. `fields` must follow `ty`'s layout.
    pub(crate) fn from_parts(ty: Arc<TypeDef>, mut fields: Vec<Field>) -> Thing {
        fields.resize_with(ty.fields().len(), Field::default);
        Thing {
            inner: Arc::new(ThingInner {
                ty,
                fields: fields.into_boxed_slice(),
                identity: OnceLock::new(),
                idkey: OnceLock::new(),
            }),
        }
    }

    /// Starts a builder holding a copy of this Thing's fields.
    pub fn builder(&self) -> ThingBuilder {
        ThingBuilder::from_fields(self.inner.ty.clone(), self.inner.fields.to_vec())
    }

    pub fn type_def(&self) -> &Arc<TypeDef> {
        &self.inner.ty
    }

    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.inner.fields
    }

    /// Returns the field by name. Unknown names read as absent.
    pub fn field(&self, name: &str) -> &Field {
        self.inner
            .ty
            .field_index(name)
            .and_then(|idx| self.inner.fields.get(idx))
            .unwrap_or(&ABSENT)
    }

    /// Returns the present value of a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field(name).value()
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.field(name).is_declared()
    }

    /// Declared fields with their definitions.
    pub fn declared(&self) -> impl Iterator<Item = (&FieldDef, &Field)> {
        self.inner
            .ty
            .fields()
            .iter()
            .zip(self.inner.fields.iter())
            .filter(|(_, field)| field.is_declared())
    }

    /// True if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.inner.fields.iter().all(Field::is_absent)
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(a: &Thing, b: &Thing) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(super) fn identity_cell(&self) -> &OnceLock<Option<Thing>> {
        &self.inner.identity
    }

    pub(super) fn idkey_cell(&self) -> &OnceLock<Idkey> {
        &self.inner.idkey
    }

    /// Compares under the given mode.
    pub fn equals(&self, other: &Thing, mode: Equality) -> bool {
        if Thing::ptr_eq(self, other) {
            return true;
        }
        if self.type_name() != other.type_name() {
            return false;
        }
        let ty = self.type_def();
        let same_layout = Arc::ptr_eq(ty, other.type_def());
        let identity_only = mode == Equality::Identity && ty.is_identifiable();

        for (idx, def) in ty.fields().iter().enumerate() {
            if identity_only && !def.is_identifying() {
                continue;
            }
            let a = &self.inner.fields[idx];
            let b = if same_layout {
                &other.inner.fields[idx]
            } else {
                other.field(def.name())
            };
            let equal = match mode {
                Equality::StateDeclared if a.is_absent() || b.is_absent() => true,
                _ => a.equals(b, mode),
            };
            if !equal {
                return false;
            }
        }
        true
    }

    /// Hashes under the given mode, consistent with [`Thing::equals`].
    ///
    /// `StateDeclared` hashes the type name only, since any field may be
    /// skipped by the comparison.
    pub fn hash_with<H: Hasher>(&self, mode: Equality, state: &mut H) {
        self.type_name().hash(state);
        if mode == Equality::StateDeclared {
            return;
        }
        let ty = self.type_def();
        let identity_only = mode == Equality::Identity && ty.is_identifiable();
        for (def, field) in ty.fields().iter().zip(self.inner.fields.iter()) {
            if identity_only && !def.is_identifying() {
                continue;
            }
            match field.value() {
                None => 0u8.hash(state),
                Some(value) => {
                    1u8.hash(state);
                    value.hash_into(mode, state);
                }
            }
        }
    }

    /// Hash code under the given mode.
    pub fn hash_code(&self, mode: Equality) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash_with(mode, &mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Thing {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, Equality::State)
    }
}

impl Eq for Thing {}

impl Hash for Thing {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_with(Equality::State, state);
    }
}

impl fmt::Debug for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.type_name());
        for (def, field) in self.declared() {
            if def.is_dangerous() {
                out.field(def.name(), &format_args!("<redacted>"));
            } else {
                out.field(def.name(), field);
            }
        }
        out.finish()
    }
}
