//! Core entity model for Curio's record-merge engine.
//!
//! Defines the static configuration every merge consumes:
//! - [`Record`]: one row of a collection table, read as a JSON object
//! - [`EntityType`]: declares a mergeable type's table, fields, and relations
//! - [`StrategyDirective`] / [`RelationDirective`]: the strategy catalog and
//!   its normalization from raw (name or mapping) strategies
//! - [`EntityRegistry`]: the frozen, startup-built set of registrations
//! - [`ArchiveHook`]: optional per-type hook run on a source record before deletion
//!
//! Nothing here touches the database. The merge engine in `curio-merge`
//! reads these types; it never mutates them.

mod error;
mod handler;
mod record;
mod registry;
mod schema;
pub mod strategy;

pub use error::{ConfigError, ConfigResult};
pub use handler::{ArchiveHook, ArchivedSnapshot, NoArchive, SnapshotArchive};
pub use record::Record;
pub use registry::{EntityRegistry, EntityRegistryBuilder};
pub use schema::{
    validate_identifier, EntityType, FieldSpec, FieldType, RedundancyRule, RelationDescriptor,
};
pub use strategy::{
    RawStrategy, RelationAction, RelationDirective, StrategyDirective, StrategyKind,
    DEFAULT_FIELD_STRATEGY, DEFAULT_RELATION_ACTION, DEFAULT_SEPARATOR,
};
