//! Schema model for relcontent.
//!
//! The catalog describes entity types (with base types, properties and
//! abstract/hidden flags) and relationship types (with oriented endpoints,
//! multiplicity, own properties and base relationships). It is read-only for
//! the lifetime of a descriptor build.

mod entity;
mod property;
mod relationship;
mod schema;
mod types;

pub use entity::EntityTypeDef;
pub use property::{PropertyDef, ResolvedProperty};
pub use relationship::{EndpointDef, RelationshipTypeDef};
pub use schema::SchemaBundle;
pub use types::{Direction, Multiplicity, ScalarType};
