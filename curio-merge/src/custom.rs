use crate::error::EngineResult;
use crate::relations::RelationCounts;
use crate::resolver::Resolution;
use curio_model::{Record, RelationDescriptor};
use curio_types::RecordId;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A caller-supplied field resolver:
/// `(source_value, target_value, source_record, target_record) -> resolution`.
pub type CustomResolver = dyn Fn(&Value, &Value, &Record, &Record) -> Resolution + Send + Sync;

/// Caller-supplied logic for a `CUSTOM` relation directive.
///
/// Runs inside the merge transaction. Implementations must not mutate
/// anything when `dry_run` is set, and must not commit.
pub trait RelationHandler: Send + Sync {
    fn reassign(
        &self,
        conn: &Connection,
        relation: &RelationDescriptor,
        source: RecordId,
        target: RecordId,
        dry_run: bool,
    ) -> EngineResult<RelationCounts>;
}

/// Named custom resolvers and relation handlers, configured at startup and
/// handed to the engine.
#[derive(Clone, Default)]
pub struct CustomRegistry {
    resolvers: HashMap<String, Arc<CustomResolver>>,
    relation_handlers: HashMap<String, Arc<dyn RelationHandler>>,
}

impl CustomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field resolver under `name`, replacing any previous one.
    pub fn register_resolver<F>(&mut self, name: impl Into<String>, resolver: F) -> &mut Self
    where
        F: Fn(&Value, &Value, &Record, &Record) -> Resolution + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Arc::new(resolver));
        self
    }

    /// Registers a relation handler under `name`, replacing any previous one.
    pub fn register_relation_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl RelationHandler + 'static,
    ) -> &mut Self {
        self.relation_handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn resolver(&self, name: &str) -> Option<&CustomResolver> {
        self.resolvers.get(name).map(Arc::as_ref)
    }

    pub fn relation_handler(&self, name: &str) -> Option<&dyn RelationHandler> {
        self.relation_handlers.get(name).map(Arc::as_ref)
    }
}

impl fmt::Debug for CustomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRegistry")
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("relation_handlers", &self.relation_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
