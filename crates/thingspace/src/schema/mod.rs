//! Schema metadata driving every Thing.
//!
//! A [`Schema`] is the table a code generator would otherwise bake into one
//! struct per type: the ordered field list of each Thing/Action type, the
//! closed enums, and the open types (interfaces and varieties) with their
//! members. Everything derived from that table (derivation order, wire order,
//! dangerous reachability, compiled reaction rules) is computed once in
//! [`SchemaBuilder::build`].
//!
//! # Example
//!
//! ```rust
//! use thingspace::schema::{FieldDef, Schema};
//! use thingspace::derive::Derivation;
//!
//! let schema = Schema::builder()
//!     .thing("Item", |t| t
//!         .field(FieldDef::text("id", 1).identifying())
//!         .field(FieldDef::text("val", 2))
//!         .field(FieldDef::text("label", 3)
//!             .derived(Derivation::first_available(["val", "id"]))))
//!     .build()
//!     .unwrap();
//!
//! let item = schema.builder_for("Item").unwrap()
//!     .set("id", "bar")
//!     .build();
//! assert_eq!(item.get("label").and_then(|v| v.as_text()), Some("bar"));
//! ```

mod analysis;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::derive::Derivation;
use crate::error::SchemaError;
use crate::model::{ThingBuilder, Value};
use crate::reaction::{ReactionRule, Trigger};

// =============================================================================
// FIELD KINDS
// =============================================================================

/// The shape of a field's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Int,
    Double,
    Text,
    /// A closed enum, by enum name.
    Enum(String),
    /// A nested Thing of one concrete type, by type name.
    Thing(String),
    /// An interface or variety: any member type, or the unknown sentinel.
    Open(String),
    /// Ordered list; elements may be null.
    List(Box<FieldKind>),
    /// String-keyed map; values may be null.
    Map(Box<FieldKind>),
}

impl FieldKind {
    /// Creates a list kind.
    pub fn list(element: FieldKind) -> Self {
        FieldKind::List(Box::new(element))
    }

    /// Creates a map kind.
    pub fn map(value: FieldKind) -> Self {
        FieldKind::Map(Box::new(value))
    }

    /// Returns true for lists and maps.
    pub fn is_collection(&self) -> bool {
        matches!(self, FieldKind::List(_) | FieldKind::Map(_))
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Bool => "a boolean",
            FieldKind::Int => "an integer",
            FieldKind::Double => "a number",
            FieldKind::Text => "a string",
            FieldKind::Enum(_) => "an enum string",
            FieldKind::Thing(_) => "an object",
            FieldKind::Open(_) => "an object with __typename",
            FieldKind::List(_) => "an array",
            FieldKind::Map(_) => "an object map",
        }
    }

    /// Returns true if `value` has this shape.
    ///
    /// Open kinds accept any Thing; membership is checked by decoders, which
    /// have the schema at hand.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Int, Value::Int(_))
            | (FieldKind::Double, Value::Double(_))
            | (FieldKind::Text, Value::Text(_))
            | (FieldKind::Enum(_), Value::Enum(_))
            | (FieldKind::Open(_), Value::Thing(_) | Value::Unknown(_)) => true,
            (FieldKind::Thing(name), Value::Thing(thing)) => thing.type_name() == name,
            (FieldKind::List(element), Value::List(items)) => {
                items.iter().flatten().all(|item| element.accepts(item))
            }
            (FieldKind::Map(element), Value::Map(entries)) => {
                entries.values().flatten().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }

    /// Type names this kind can reference directly or through collections.
    pub(crate) fn referenced_types<'a>(&'a self, schema_opens: &'a FxHashMap<String, OpenDef>, out: &mut Vec<&'a str>) {
        match self {
            FieldKind::Thing(name) => out.push(name),
            FieldKind::Open(name) => {
                if let Some(open) = schema_opens.get(name) {
                    out.extend(open.members.iter().map(String::as_str));
                }
            }
            FieldKind::List(element) | FieldKind::Map(element) => {
                element.referenced_types(schema_opens, out)
            }
            _ => {}
        }
    }
}

// =============================================================================
// FIELD DEFINITIONS
// =============================================================================

/// One field of a Thing/Action type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
    pub(crate) compat_id: u32,
    pub(crate) identifying: bool,
    pub(crate) dangerous: bool,
    pub(crate) derivation: Option<Derivation>,
    pub(crate) triggers: Vec<Trigger>,
    // Computed by SchemaBuilder::build.
    pub(crate) reaches_dangerous: bool,
    pub(crate) may_link: bool,
    pub(crate) on_wire: bool,
}

impl FieldDef {
    /// Creates a field with the given kind and stable compat id.
    pub fn new(name: impl Into<String>, kind: FieldKind, compat_id: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            compat_id,
            identifying: false,
            dangerous: false,
            derivation: None,
            triggers: Vec::new(),
            reaches_dangerous: false,
            may_link: false,
            on_wire: true,
        }
    }

    pub fn boolean(name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Bool, compat_id)
    }

    pub fn int(name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Int, compat_id)
    }

    pub fn double(name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Double, compat_id)
    }

    pub fn text(name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Text, compat_id)
    }

    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Enum(enum_name.into()), compat_id)
    }

    pub fn thing(name: impl Into<String>, type_name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Thing(type_name.into()), compat_id)
    }

    pub fn open(name: impl Into<String>, open_name: impl Into<String>, compat_id: u32) -> Self {
        Self::new(name, FieldKind::Open(open_name.into()), compat_id)
    }

    pub fn list(name: impl Into<String>, element: FieldKind, compat_id: u32) -> Self {
        Self::new(name, FieldKind::list(element), compat_id)
    }

    pub fn map(name: impl Into<String>, value: FieldKind, compat_id: u32) -> Self {
        Self::new(name, FieldKind::map(value), compat_id)
    }

    /// Marks the field as part of the type's identity.
    pub fn identifying(mut self) -> Self {
        self.identifying = true;
        self
    }

    /// Marks the field as holding sensitive data.
    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    /// Makes the field derived.
    pub fn derived(mut self, derivation: Derivation) -> Self {
        self.derivation = Some(derivation);
        self
    }

    /// Adds a reactive trigger. Only valid on contextual derivations.
    pub fn reactive(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn compat_id(&self) -> u32 {
        self.compat_id
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }

    pub fn is_dangerous(&self) -> bool {
        self.dangerous
    }

    pub fn derivation(&self) -> Option<&Derivation> {
        self.derivation.as_ref()
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// True if this field is dangerous or can hold a dangerous-capable Thing.
    pub fn reaches_dangerous(&self) -> bool {
        self.reaches_dangerous
    }

    /// True if values of this field can contain identifiable Things.
    pub fn may_link(&self) -> bool {
        self.may_link
    }

    /// True if the field is written by the wire codec.
    ///
    /// Pure derivations are recomputed after decode, so they stay off the
    /// wire unless they are identifying or read their own prior value.
    pub fn is_on_wire(&self) -> bool {
        self.on_wire
    }

    /// True for pure derivations (recomputed on every build).
    pub fn is_pure_derived(&self) -> bool {
        self.derivation.as_ref().is_some_and(Derivation::is_pure)
    }

    /// True for contextual derivations (recomputed on reaction).
    pub fn is_contextual(&self) -> bool {
        self.derivation.as_ref().is_some_and(|d| !d.is_pure())
    }
}

// =============================================================================
// TYPE DEFINITIONS
// =============================================================================

/// Remote dispatch priority of an Action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Send as soon as possible, ahead of batching.
    Immediate,
    /// Send with the next batch.
    #[default]
    Soon,
    /// Send whenever convenient.
    Whenever,
}

/// Whether a type describes state (Thing) or a dispatched command (Action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Thing,
    Action { priority: Priority },
}

/// A finalized Thing/Action type.
#[derive(Debug)]
pub struct TypeDef {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) index: FxHashMap<String, usize>,
    pub(crate) wire_order: Vec<usize>,
    pub(crate) derive_order: Vec<usize>,
    pub(crate) contextual: Vec<usize>,
    pub(crate) rules: Vec<ReactionRule>,
    pub(crate) identifiable: bool,
    pub(crate) dangerous_capable: bool,
    pub(crate) may_contain_identifiable: bool,
}

impl TypeDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Dispatch priority, for Action types.
    pub fn priority(&self) -> Option<Priority> {
        match self.kind {
            TypeKind::Action { priority } => Some(priority),
            TypeKind::Thing => None,
        }
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&idx| &self.fields[idx])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// True if the type has at least one identifying field.
    pub fn is_identifiable(&self) -> bool {
        self.identifiable
    }

    /// True if any value of this type can contain dangerous data.
    pub fn is_dangerous_capable(&self) -> bool {
        self.dangerous_capable
    }

    /// True if values can hold identifiable Things below the top level.
    pub fn may_contain_identifiable(&self) -> bool {
        self.may_contain_identifiable
    }

    /// Indexes of wire fields, in compat id order.
    pub fn wire_order(&self) -> &[usize] {
        &self.wire_order
    }

    /// Indexes of pure derived fields, dependencies first.
    pub fn derive_order(&self) -> &[usize] {
        &self.derive_order
    }

    /// Indexes of contextual derived fields.
    pub fn contextual_fields(&self) -> &[usize] {
        &self.contextual
    }

    /// Reaction rules observed on changes to this type.
    pub fn rules(&self) -> &[ReactionRule] {
        &self.rules
    }
}

/// A closed enum. Id 0 is reserved for dynamic (unlisted) values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    name: String,
    values: Vec<(u32, String)>,
}

impl EnumDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[(u32, String)] {
        &self.values
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.values
            .iter()
            .find(|(value_id, _)| *value_id == id)
            .map(|(_, name)| name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.values
            .iter()
            .find(|(_, value_name)| value_name == name)
            .map(|(id, _)| *id)
    }
}

/// Interface or variety.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    Interface,
    Variety,
}

/// An open type: a union of member types with an unknown fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDef {
    pub(crate) name: String,
    pub(crate) kind: OpenKind,
    pub(crate) members: Vec<String>,
}

impl OpenDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OpenKind {
        self.kind
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.members.iter().any(|m| m == type_name)
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// A validated, immutable schema.
#[derive(Debug, Default)]
pub struct Schema {
    types: FxHashMap<String, Arc<TypeDef>>,
    enums: FxHashMap<String, EnumDef>,
    opens: FxHashMap<String, OpenDef>,
}

impl Schema {
    /// Starts a new schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn type_def(&self, name: &str) -> Option<&Arc<TypeDef>> {
        self.types.get(name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn open_def(&self, name: &str) -> Option<&OpenDef> {
        self.opens.get(name)
    }

    /// All types, in no particular order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeDef>> {
        self.types.values()
    }

    /// Resolves a concrete type name written for an open-typed field.
    ///
    /// Returns `None` when the name is unknown or not a member, which callers
    /// turn into the unknown sentinel.
    pub fn resolve_open(&self, open_name: &str, type_name: &str) -> Option<&Arc<TypeDef>> {
        let open = self.opens.get(open_name)?;
        if !open.contains(type_name) {
            return None;
        }
        self.types.get(type_name)
    }

    /// Creates an empty builder for the named type.
    pub fn builder_for(&self, type_name: &str) -> Result<ThingBuilder, SchemaError> {
        self.type_def(type_name)
            .map(|ty| ThingBuilder::new(ty.clone()))
            .ok_or_else(|| SchemaError::UnknownType {
                name: type_name.to_string(),
            })
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Builder for one type's field list.
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    fields: Vec<FieldDef>,
}

impl TypeBuilder {
    fn new(name: String, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            fields: Vec::new(),
        }
    }

    /// Appends a field. Declaration order is kept; wire order comes from
    /// compat ids.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends several fields.
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }
}

/// Builder for a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeBuilder>,
    enums: Vec<EnumDef>,
    opens: Vec<OpenDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a Thing type using a builder function.
    pub fn thing<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(TypeBuilder) -> TypeBuilder,
    {
        self.types.push(f(TypeBuilder::new(name.into(), TypeKind::Thing)));
        self
    }

    /// Adds an Action type using a builder function.
    pub fn action<F>(mut self, name: impl Into<String>, priority: Priority, f: F) -> Self
    where
        F: FnOnce(TypeBuilder) -> TypeBuilder,
    {
        self.types
            .push(f(TypeBuilder::new(name.into(), TypeKind::Action { priority })));
        self
    }

    /// Adds a closed enum. Ids must be non-zero and unique.
    pub fn enumeration<'v>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = (u32, &'v str)>,
    ) -> Self {
        self.enums.push(EnumDef {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(id, value)| (id, value.to_string()))
                .collect(),
        });
        self
    }

    /// Adds an interface over the given member types.
    pub fn interface<'m>(mut self, name: impl Into<String>, members: impl IntoIterator<Item = &'m str>) -> Self {
        self.opens.push(OpenDef {
            name: name.into(),
            kind: OpenKind::Interface,
            members: members.into_iter().map(str::to_string).collect(),
        });
        self
    }

    /// Adds a variety (closed-at-write, open-at-read union).
    pub fn variety<'m>(mut self, name: impl Into<String>, members: impl IntoIterator<Item = &'m str>) -> Self {
        self.opens.push(OpenDef {
            name: name.into(),
            kind: OpenKind::Variety,
            members: members.into_iter().map(str::to_string).collect(),
        });
        self
    }

    /// Validates the table and computes every static property.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let (types, enums, opens) = analysis::finalize(self.types, self.enums, self.opens)?;
        Ok(Schema {
            types: types
                .into_iter()
                .map(|ty| (ty.name.clone(), Arc::new(ty)))
                .collect(),
            enums: enums.into_iter().map(|e| (e.name.clone(), e)).collect(),
            opens: opens.into_iter().map(|o| (o.name.clone(), o)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::Trigger;

    #[test]
    fn test_duplicate_compat_id_rejected() {
        let result = Schema::builder()
            .thing("A", |t| t
                .field(FieldDef::text("id", 1))
                .field(FieldDef::text("val", 1)))
            .build();
        assert!(matches!(result, Err(SchemaError::DuplicateCompatId { compat_id: 1, .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::builder()
            .thing("A", |t| t.field(FieldDef::text("id", 1)))
            .enumeration("A", [(1, "X")])
            .build();
        assert!(matches!(result, Err(SchemaError::DuplicateName { .. })));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let result = Schema::builder()
            .thing("A", |t| t.field(FieldDef::thing("b", "Missing", 1)))
            .build();
        assert!(matches!(result, Err(SchemaError::UnknownType { .. })));
    }

    #[test]
    fn test_enum_zero_reserved() {
        let result = Schema::builder().enumeration("E", [(0, "ZERO")]).build();
        assert!(matches!(result, Err(SchemaError::InvalidEnumId { id: 0, .. })));
    }

    #[test]
    fn test_derivation_cycle_rejected() {
        let result = Schema::builder()
            .thing("A", |t| t
                .field(FieldDef::text("x", 1).derived(Derivation::first_available(["y"])))
                .field(FieldDef::text("y", 2).derived(Derivation::first_available(["x"]))))
            .build();
        assert!(matches!(result, Err(SchemaError::DerivationCycle { .. })));
    }

    #[test]
    fn test_trigger_requires_contextual() {
        let result = Schema::builder()
            .thing("A", |t| t
                .field(FieldDef::text("val", 1))
                .field(FieldDef::text("x", 2).reactive(Trigger::changed(["val"]))))
            .build();
        assert!(matches!(result, Err(SchemaError::NotContextual { .. })));
    }

    #[test]
    fn test_trigger_path_validated() {
        let result = Schema::builder()
            .thing("A", |t| t
                .field(FieldDef::text("val", 1))
                .field(FieldDef::text("x", 2)
                    .derived(Derivation::contextual(|_| crate::model::Field::Null))
                    .reactive(Trigger::changed(["val", "deeper"]))))
            .build();
        assert!(matches!(result, Err(SchemaError::InvalidTriggerPath { .. })));
    }

    #[test]
    fn test_wire_order_follows_compat_ids() {
        let schema = Schema::builder()
            .thing("A", |t| t
                .field(FieldDef::text("late", 9))
                .field(FieldDef::text("early", 2))
                .field(FieldDef::text("derived", 5).derived(Derivation::first_available(["early"]))))
            .build()
            .unwrap();
        let ty = schema.type_def("A").unwrap();
        let names: Vec<&str> = ty.wire_order().iter().map(|&i| ty.fields()[i].name()).collect();
        assert_eq!(names, vec!["early", "late"]);
        assert!(!ty.field("derived").unwrap().is_on_wire());
    }

    #[test]
    fn test_dangerous_reachability_handles_recursion() {
        let schema = Schema::builder()
            .thing("Node", |t| t
                .field(FieldDef::text("id", 1).identifying())
                .field(FieldDef::thing("next", "Node", 2)))
            .thing("Holder", |t| t
                .field(FieldDef::list("nodes", FieldKind::Thing("Secretive".into()), 1)))
            .thing("Secretive", |t| t
                .field(FieldDef::thing("loop", "Holder", 1))
                .field(FieldDef::text("pin", 2).dangerous()))
            .build()
            .unwrap();
        assert!(!schema.type_def("Node").unwrap().is_dangerous_capable());
        assert!(schema.type_def("Holder").unwrap().is_dangerous_capable());
        assert!(schema.type_def("Secretive").unwrap().is_dangerous_capable());
        assert!(schema.type_def("Node").unwrap().may_contain_identifiable());
        assert!(!schema.type_def("Holder").unwrap().may_contain_identifiable());
    }

    #[test]
    fn test_action_priority() {
        let schema = Schema::builder()
            .action("Save", Priority::Immediate, |t| t.field(FieldDef::text("note", 1)))
            .build()
            .unwrap();
        let ty = schema.type_def("Save").unwrap();
        assert_eq!(ty.priority(), Some(Priority::Immediate));
        assert!(!ty.is_identifiable());
    }
}
