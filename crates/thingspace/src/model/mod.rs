//! Value model for Things.
//!
//! - [`Field`]: three-state presence (absent, null, value)
//! - [`Value`]: typed field contents
//! - [`Thing`]: immutable, shareable record of a schema type
//! - [`ThingBuilder`]: mutable construction and merging
//! - [`Idkey`]: identity hash

pub mod builder;
pub mod identity;
pub mod thing;
pub mod value;

pub use builder::ThingBuilder;
pub use identity::Idkey;
pub use thing::{Equality, Thing};
pub use value::{ABSENT, EnumValue, Field, UnknownPayload, UnknownThing, Value};
