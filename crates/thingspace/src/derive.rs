//! Derived fields.
//!
//! Pure derivations are functions of sibling fields and run on every
//! [`ThingBuilder::build`](crate::model::ThingBuilder::build), in the
//! dependency order computed by the schema. Contextual derivations need the
//! surrounding graph; the [`Space`](crate::space::Space) runs them when the
//! field is still undeclared or when a reaction names it.

use std::fmt;
use std::sync::Arc;

use crate::model::{ABSENT, Field, Thing, Value};
use crate::reaction::Diff;
use crate::schema::TypeDef;

/// Read-only view of a Thing's fields while it is being derived.
#[derive(Clone, Copy)]
pub struct Fields<'a> {
    ty: &'a TypeDef,
    fields: &'a [Field],
}

impl<'a> Fields<'a> {
    pub(crate) fn new(ty: &'a TypeDef, fields: &'a [Field]) -> Self {
        Self { ty, fields }
    }

    /// Returns the field by name. Unknown names read as absent.
    pub fn get(&self, name: &str) -> &'a Field {
        self.ty
            .field_index(name)
            .and_then(|idx| self.fields.get(idx))
            .unwrap_or(&ABSENT)
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.get(name).value()
    }

    pub fn text(&self, name: &str) -> Option<&'a str> {
        self.value(name).and_then(Value::as_text)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_int)
    }
}

/// Function backing a custom pure derivation.
pub type PureFn = Arc<dyn Fn(&Fields<'_>) -> Field + Send + Sync>;

/// Finds live Things in the surrounding graph.
pub trait Selector {
    /// Returns the current snapshot of the entity with the same identity.
    fn find(&self, identity: &Thing) -> Option<Thing>;

    /// Returns current snapshots of every live node of a type.
    fn all_of(&self, type_name: &str) -> Vec<Thing>;
}

/// Everything a contextual derivation may read.
pub struct DeriveContext<'a> {
    /// The Thing whose field is being derived, as last built.
    pub current: &'a Thing,
    /// Name of the field being derived.
    pub field: &'a str,
    /// Changes of the round that triggered this derivation.
    pub diff: &'a Diff,
    pub selector: &'a dyn Selector,
}

/// A derivation that needs the graph.
pub trait ContextualDerive: Send + Sync {
    fn derive(&self, ctx: &DeriveContext<'_>) -> Field;
}

impl<F> ContextualDerive for F
where
    F: Fn(&DeriveContext<'_>) -> Field + Send + Sync,
{
    fn derive(&self, ctx: &DeriveContext<'_>) -> Field {
        self(ctx)
    }
}

/// How a derived field gets its value.
#[derive(Clone)]
pub enum Derivation {
    /// The first source field holding a non-blank value.
    FirstAvailable(Vec<String>),
    /// A custom function of the named sibling fields.
    Pure { inputs: Vec<String>, func: PureFn },
    /// Computed with access to the diff and a selector.
    Contextual(Arc<dyn ContextualDerive>),
}

impl Derivation {
    pub fn first_available<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Derivation::FirstAvailable(sources.into_iter().map(Into::into).collect())
    }

    pub fn pure<I, S, F>(inputs: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Fields<'_>) -> Field + Send + Sync + 'static,
    {
        Derivation::Pure {
            inputs: inputs.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }

    /// Wraps a closure; implement [`ContextualDerive`] directly for stateful
    /// derivations and use the `Contextual` variant.
    pub fn contextual<F>(func: F) -> Self
    where
        F: Fn(&DeriveContext<'_>) -> Field + Send + Sync + 'static,
    {
        Derivation::Contextual(Arc::new(func))
    }

    pub fn is_pure(&self) -> bool {
        !matches!(self, Derivation::Contextual(_))
    }

    /// Sibling fields a pure derivation reads. Empty for contextual ones.
    pub fn inputs(&self) -> &[String] {
        match self {
            Derivation::FirstAvailable(sources) => sources,
            Derivation::Pure { inputs, .. } => inputs,
            Derivation::Contextual(_) => &[],
        }
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Derivation::FirstAvailable(sources) => f.debug_tuple("FirstAvailable").field(sources).finish(),
            Derivation::Pure { inputs, .. } => f.debug_struct("Pure").field("inputs", inputs).finish_non_exhaustive(),
            Derivation::Contextual(_) => f.write_str("Contextual"),
        }
    }
}

/// Runs every pure derivation of `ty` over `fields`, in dependency order.
pub(crate) fn run_pure(ty: &TypeDef, fields: &mut [Field]) {
    run_pure_where(ty, fields, |_| true);
}

/// Recomputes only the pure derivations a decoder could not read back.
/// Values kept on the wire (identifying or self-referencing) stay as decoded.
pub(crate) fn run_pure_off_wire(ty: &TypeDef, fields: &mut [Field]) {
    run_pure_where(ty, fields, |idx| !ty.fields()[idx].is_on_wire());
}

fn run_pure_where(ty: &TypeDef, fields: &mut [Field], recompute: impl Fn(usize) -> bool) {
    for &idx in ty.derive_order() {
        if !recompute(idx) {
            continue;
        }
        let next = match ty.fields()[idx].derivation() {
            Some(Derivation::FirstAvailable(sources)) => first_available(&Fields::new(ty, fields), sources),
            Some(Derivation::Pure { func, .. }) => func(&Fields::new(ty, fields)),
            _ => continue,
        };
        fields[idx] = next;
    }
}

/// Runs the contextual derivation of one field.
///
/// Returns `None` when the field is not contextual.
pub(crate) fn run_contextual(current: &Thing, idx: usize, diff: &Diff, selector: &dyn Selector) -> Option<Field> {
    let def = current.type_def().fields().get(idx)?;
    let Some(Derivation::Contextual(derive)) = def.derivation() else {
        return None;
    };
    let ctx = DeriveContext {
        current,
        field: def.name(),
        diff,
        selector,
    };
    Some(derive.derive(&ctx))
}

/// First non-blank source value; null if a source was declared, else absent.
fn first_available(fields: &Fields<'_>, sources: &[String]) -> Field {
    let mut declared = false;
    for source in sources {
        match fields.get(source) {
            Field::Absent => {}
            Field::Null => declared = true,
            Field::Value(value) => {
                declared = true;
                if !is_blank(value) {
                    return Field::Value(value.clone());
                }
            }
        }
    }
    if declared { Field::Null } else { Field::Absent }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Text(s) => s.trim().is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        _ => false,
    }
}
