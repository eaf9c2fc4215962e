//! thingspace: a schema-driven runtime for normalized, diff-aware,
//! offline-capable data objects.
//!
//! A client mirrors server state as immutable [`Thing`]s described by a
//! [`Schema`], mutates it locally inside a [`Space`], and resynchronizes.
//!
//! # Overview
//!
//! - **Three-state fields**: every field is absent, null or a value, and
//!   absent fields never reach equality, hashing, JSON or the wire
//! - **Identity vs state**: [`Equality`] modes and a stable SHA-256
//!   [`Idkey`] over the identity projection
//! - **Normalized graph**: the [`Space`] deduplicates entities by identity
//!   and rebuilds snapshots incrementally
//! - **Derived fields**: pure derivations on every build, contextual ones
//!   when a reaction names them
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use thingspace::{FieldDef, Schema, Space, Value};
//! use thingspace::codec::{compress, uncompress};
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .thing("City", |t| t
//!             .field(FieldDef::text("name", 1).identifying())
//!             .field(FieldDef::int("population", 2)))
//!         .build()
//!         .unwrap(),
//! );
//!
//! let city = schema
//!     .builder_for("City")
//!     .unwrap()
//!     .set("name", "Lisbon")
//!     .set("population", 545_000)
//!     .build();
//!
//! // Binary round trip
//! let bytes = compress(&city).unwrap();
//! assert_eq!(uncompress(&schema, "City", &bytes).unwrap(), city);
//!
//! // Imprint into a graph and settle
//! let mut space = Space::new(schema.clone());
//! let id = space.imprint(&city, None).unwrap();
//! let diff = space.settle().unwrap();
//! assert_eq!(diff.len(), 1);
//! assert_eq!(space.build(id).unwrap().get("population"), Some(&Value::Int(545_000)));
//! ```
//!
//! # Modules
//!
//! - [`schema`]: type table, validation and static analysis
//! - [`model`]: values, Things, builders and identity
//! - [`derive`]: pure and contextual derivations
//! - [`reaction`]: triggers, diffs and reaction keys
//! - [`space`]: the normalized graph store
//! - [`codec`]: bit-packed binary form and snapshot envelope
//! - [`json`]: JSON emission and both decoders
//! - [`redact`]: reversible redaction of dangerous fields
//! - [`error`], [`limits`]
//!
//! # Security
//!
//! Decoders handle untrusted input: lengths are bounded by [`limits`],
//! nesting depth is capped, and failures are reported as errors without
//! exposing partially decoded Things.

pub mod codec;
pub mod derive;
pub mod error;
pub mod json;
pub mod limits;
pub mod model;
pub mod reaction;
pub mod redact;
pub mod schema;
pub mod space;

#[cfg(test)]
mod test_support;

pub use codec::{compress, decode_snapshot, encode_snapshot, uncompress, EncodeOptions};
pub use derive::{Derivation, DeriveContext, Fields, Selector};
pub use error::{DecodeError, EncodeError, JsonError, SchemaError, SpaceError};
pub use json::JsonOptions;
pub use model::{EnumValue, Equality, Field, Idkey, Thing, ThingBuilder, UnknownPayload, UnknownThing, Value};
pub use reaction::{Change, Diff, ReactionKey, Trigger};
pub use redact::{KeyedRedactor, Redactor};
pub use schema::{FieldDef, FieldKind, Priority, Schema, SchemaBuilder, TypeDef};
pub use space::{NodeId, Space, SpaceConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
