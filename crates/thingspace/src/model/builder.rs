//! Builder API for Thing construction.
//!
//! Provides a fluent interface: setters take and return the builder by value,
//! and [`ThingBuilder::build`] runs pure derivations before freezing.
//!
//! # Example
//!
//! ```rust
//! use thingspace::schema::{FieldDef, Schema};
//!
//! let schema = Schema::builder()
//!     .thing("City", |t| t
//!         .field(FieldDef::text("name", 1).identifying())
//!         .field(FieldDef::int("population", 2)))
//!     .build()
//!     .unwrap();
//!
//! let city = schema.builder_for("City").unwrap()
//!     .set("name", "Lisbon")
//!     .set("population", 545_000)
//!     .build();
//! assert!(city.is_declared("population"));
//! ```

use std::sync::Arc;

use tracing::warn;

use super::thing::Thing;
use super::value::{ABSENT, Field, Value};
use crate::derive;
use crate::error::SchemaError;
use crate::schema::TypeDef;

/// Mutable staging area for one Thing.
#[derive(Debug, Clone)]
pub struct ThingBuilder {
    ty: Arc<TypeDef>,
    fields: Vec<Field>,
}

impl ThingBuilder {
    /// Creates a builder with every field absent.
    pub fn new(ty: Arc<TypeDef>) -> Self {
        let fields = vec![Field::Absent; ty.fields().len()];
        Self { ty, fields }
    }

    pub(crate) fn from_fields(ty: Arc<TypeDef>, mut fields: Vec<Field>) -> Self {
        fields.resize_with(ty.fields().len(), Field::default);
        Self { ty, fields }
    }

    pub fn type_def(&self) -> &Arc<TypeDef> {
        &self.ty
    }

    /// Current value of a field.
    pub fn field(&self, name: &str) -> &Field {
        self.ty
            .field_index(name)
            .and_then(|idx| self.fields.get(idx))
            .unwrap_or(&ABSENT)
    }

    /// Sets a field to a value.
    pub fn set(self, name: &str, value: impl Into<Value>) -> Self {
        self.set_field(name, Field::Value(value.into()))
    }

    /// Sets a field to present-null.
    pub fn set_null(self, name: &str) -> Self {
        self.set_field(name, Field::Null)
    }

    /// Returns a field to absent.
    pub fn unset(self, name: &str) -> Self {
        self.set_field(name, Field::Absent)
    }

    /// Sets a field. Unknown names and mismatched kinds are logged and
    /// ignored; use [`ThingBuilder::try_set`] to surface them.
    pub fn set_field(mut self, name: &str, field: Field) -> Self {
        if let Err(error) = self.try_set(name, field) {
            warn!(%error, type_name = self.ty.name(), "ignoring builder field");
        }
        self
    }

    /// Sets a field, rejecting unknown names and mismatched kinds.
    pub fn try_set(&mut self, name: &str, field: Field) -> Result<(), SchemaError> {
        let idx = self.ty.field_index(name).ok_or_else(|| SchemaError::UnknownField {
            type_name: self.ty.name().to_string(),
            field: name.to_string(),
        })?;
        if let Field::Value(value) = &field {
            if !self.ty.fields()[idx].kind().accepts(value) {
                return Err(SchemaError::KindMismatch {
                    type_name: self.ty.name().to_string(),
                    field: name.to_string(),
                });
            }
        }
        self.fields[idx] = field;
        Ok(())
    }

    /// Writes a field by index without checks. Callers guarantee the kind.
    pub(crate) fn put(&mut self, idx: usize, field: Field) {
        if let Some(slot) = self.fields.get_mut(idx) {
            *slot = field;
        }
    }

    /// Copies every field declared on `src`, leaving the rest untouched.
    pub fn merge(mut self, src: &Thing) -> Self {
        self.merge_from(src);
        self
    }

    /// In-place form of [`ThingBuilder::merge`].
    pub fn merge_from(&mut self, src: &Thing) {
        let same_layout = Arc::ptr_eq(&self.ty, src.type_def());
        for (idx, (def, field)) in src.type_def().fields().iter().zip(src.fields()).enumerate() {
            if field.is_absent() {
                continue;
            }
            if same_layout {
                self.fields[idx] = field.clone();
            } else if let Err(error) = self.try_set(def.name(), field.clone()) {
                warn!(%error, "skipping field while merging");
            }
        }
    }

    /// Runs pure derivations and freezes the Thing.
    pub fn build(mut self) -> Thing {
        derive::run_pure(&self.ty, &mut self.fields);
        Thing::from_parts(self.ty, self.fields)
    }

    /// Freezes a decoded Thing: only derivations skipped on the wire run.
    pub(crate) fn build_decoded(mut self) -> Thing {
        derive::run_pure_off_wire(&self.ty, &mut self.fields);
        Thing::from_parts(self.ty, self.fields)
    }

    /// Freezes without running derivations.
    pub(crate) fn build_raw(self) -> Thing {
        Thing::from_parts(self.ty, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_unknown_field_is_ignored() {
        let schema = test_support::schema();
        let item = schema.builder_for("Item").unwrap().set("id", "1").set("nope", 3).build();
        assert!(item.field("nope").is_absent());
        assert_eq!(item.get("id").and_then(Value::as_text), Some("1"));
    }

    #[test]
    fn test_try_set_reports_mismatch() {
        let schema = test_support::schema();
        let mut builder = schema.builder_for("Item").unwrap();
        assert!(matches!(
            builder.try_set("count", Field::from("ten")),
            Err(SchemaError::KindMismatch { .. })
        ));
        assert!(matches!(
            builder.try_set("missing", Field::Null),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(builder.try_set("count", Field::from(10)).is_ok());
    }

    #[test]
    fn test_merge_copies_declared_only() {
        let schema = test_support::schema();
        let base = schema
            .builder_for("Item")
            .unwrap()
            .set("id", "1")
            .set("val", "keep")
            .set("count", 1)
            .build();
        let update = schema.builder_for("Item").unwrap().set("id", "1").set_null("count").build();
        let merged = base.builder().merge(&update).build();
        assert_eq!(merged.get("val").and_then(Value::as_text), Some("keep"));
        assert!(merged.field("count").is_null());
    }

    #[test]
    fn test_unset_returns_to_absent() {
        let schema = test_support::schema();
        let item = test_support::item(&schema, "1", Some("x")).builder().unset("val").build();
        assert!(item.field("val").is_absent());
    }
}
