//! Record-merge engine for Curio.
//!
//! Merges a duplicate record (the *source*) into the record being kept (the
//! *target*), field by field and relation by relation, inside one SQLite
//! transaction, and writes an audit entry describing what was done.
//!
//! # Architecture
//!
//! - **Strategy catalog** (`curio-model`): closed strategy kinds, defaults,
//!   and normalization of raw strategies
//! - **Resolver**: computes each field's final value from (source, target)
//! - **Relations**: moves rows pointing at the source over to the target,
//!   settling uniqueness conflicts by skipping or deleting redundant rows
//! - **Engine**: validates the request, builds the effective strategy map,
//!   drives the two above, archives and deletes the source, writes the log
//!
//! ## Merge Process
//!
//! 1. **Validate**: distinct ids, known entity type, overrides name mergeable fields
//! 2. **Lock**: open a `BEGIN IMMEDIATE` transaction and read both records
//! 3. **Resolve**: run every field's directive
//! 4. **Reassign**: run every relation's directive
//! 5. **Commit**: archive + delete the source, update the target, write the
//!    log entry (skipped for dry runs)
//!
//! Any error before the commit rolls everything back.
//!
//! # Example
//!
//! ```
//! use curio_db::Database;
//! use curio_merge::{MergeEngine, MergeRequest};
//! use curio_model::{EntityRegistry, EntityType, FieldSpec};
//! use curio_types::RecordId;
//! use std::sync::Arc;
//!
//! let db = Database::open_in_memory().unwrap();
//! db.execute_batch(
//!     "CREATE TABLE person (id INTEGER PRIMARY KEY, email TEXT);
//!      INSERT INTO person VALUES (1, 'a@example.com'), (2, '');",
//! )
//! .unwrap();
//!
//! let mut registry = EntityRegistry::builder();
//! registry
//!     .register(EntityType::new("person", "person").with_field(FieldSpec::text("email")))
//!     .unwrap();
//!
//! let engine = MergeEngine::new(db, Arc::new(registry.build())).unwrap();
//! let request = MergeRequest::new("person", RecordId::new(1), RecordId::new(2), "curator");
//! let result = engine.merge(request).unwrap();
//! assert_eq!(result.resolved_fields["email"].value, "a@example.com");
//! ```

pub mod audit;
mod config;
mod custom;
mod engine;
mod error;
pub mod relations;
pub mod resolver;
pub mod selection;

pub use audit::{ArchivedRecord, MergeLogEntry, MergeLogQuery, StrategyMap};
pub use config::MergeConfig;
pub use custom::{CustomRegistry, CustomResolver, RelationHandler};
pub use engine::{ChainFailure, ChainOutcome, MergeEngine, MergeRequest, MergeResult, ResolvedField};
pub use error::{EngineResult, ErrorKind, MergeError};
pub use relations::RelationCounts;
pub use resolver::{Resolution, Resolver};
pub use selection::{chain_sources, resolve_source, FieldSelections, Side};
