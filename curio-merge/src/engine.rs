//! Merge orchestration.

use crate::audit::{self, ArchivedRecord, MergeLogEntry, MergeLogQuery, StrategyMap};
use crate::config::MergeConfig;
use crate::custom::CustomRegistry;
use crate::error::{EngineResult, MergeError};
use crate::relations::{reassign_relation, RelationCounts};
use crate::resolver::{Resolution, Resolver};
use crate::selection::chain_sources;
use curio_db::{delete_row, fetch_row, update_row, Database};
use curio_model::{
    ConfigError, EntityRegistry, EntityType, RawStrategy, Record, RelationDirective,
    StrategyDirective,
};
use curio_types::{Actor, MergeLogId, RecordId};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One pairwise merge: fold `source_id` into `target_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub entity_type: String,
    pub source_id: RecordId,
    pub target_id: RecordId,
    /// Replace the entity's default directive for these fields.
    pub field_overrides: BTreeMap<String, RawStrategy>,
    /// Replace the entity's default directive for these relations.
    pub relation_overrides: BTreeMap<String, RawStrategy>,
    pub actor: Actor,
    pub dry_run: bool,
    /// `None` defers to [`MergeConfig::archive_by_default`].
    pub archive: Option<bool>,
}

impl MergeRequest {
    pub fn new(
        entity_type: impl Into<String>,
        source_id: RecordId,
        target_id: RecordId,
        actor: impl Into<Actor>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            source_id,
            target_id,
            field_overrides: BTreeMap::new(),
            relation_overrides: BTreeMap::new(),
            actor: actor.into(),
            dry_run: false,
            archive: None,
        }
    }

    pub fn override_field(mut self, field: impl Into<String>, strategy: impl Into<RawStrategy>) -> Self {
        self.field_overrides.insert(field.into(), strategy.into());
        self
    }

    pub fn override_relation(
        mut self,
        relation: impl Into<String>,
        strategy: impl Into<RawStrategy>,
    ) -> Self {
        self.relation_overrides.insert(relation.into(), strategy.into());
        self
    }

    /// Adds a batch of field overrides, e.g. from
    /// [`FieldSelections::into_overrides`](crate::FieldSelections::into_overrides).
    pub fn with_field_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (String, StrategyDirective)>,
    ) -> Self {
        self.field_overrides
            .extend(overrides.into_iter().map(|(field, directive)| (field, directive.into())));
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn archive(mut self, archive: bool) -> Self {
        self.archive = Some(archive);
        self
    }

    fn with_source(&self, source_id: RecordId) -> Self {
        Self {
            source_id,
            ..self.clone()
        }
    }
}

/// A field's final value and why it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub value: Value,
    pub note: Option<String>,
}

/// What a merge did, or for a dry run, would do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    pub entity_type: String,
    pub source_id: RecordId,
    pub target_id: RecordId,
    pub resolved_fields: BTreeMap<String, ResolvedField>,
    pub relation_actions: BTreeMap<String, RelationCounts>,
    pub archived: bool,
    pub dry_run: bool,
    /// The log entry written for this merge; `None` for dry runs.
    pub log_id: Option<MergeLogId>,
}

/// The candidate that stopped a chain and why.
#[derive(Debug)]
pub struct ChainFailure {
    pub source_id: RecordId,
    pub error: MergeError,
}

/// Outcome of [`MergeEngine::merge_chain`]. Merges in `completed` are
/// committed regardless of `failed`.
#[derive(Debug)]
pub struct ChainOutcome {
    pub completed: Vec<MergeResult>,
    pub failed: Option<ChainFailure>,
    /// Candidates never attempted because an earlier one failed.
    pub remaining: Vec<RecordId>,
}

impl ChainOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// Transactional entry point for merging records.
///
/// Runs synchronously on the calling thread. Concurrent merges against the
/// same database are serialized by SQLite's write lock; a merge that cannot
/// get the lock within the connection's busy timeout fails with a retryable
/// [`MergeError::Transaction`].
pub struct MergeEngine {
    db: Database,
    registry: Arc<EntityRegistry>,
    customs: CustomRegistry,
    config: MergeConfig,
}

impl MergeEngine {
    /// Creates an engine with no custom callables and default settings.
    pub fn new(db: Database, registry: Arc<EntityRegistry>) -> EngineResult<Self> {
        Self::with_config(db, registry, CustomRegistry::default(), MergeConfig::default())
    }

    /// Creates an engine, making sure the log and archive tables exist.
    pub fn with_config(
        db: Database,
        registry: Arc<EntityRegistry>,
        customs: CustomRegistry,
        config: MergeConfig,
    ) -> EngineResult<Self> {
        audit::ensure_schema(&*db.lock()?)?;
        debug!("Merge engine ready for {} entity types", registry.len());
        Ok(Self {
            db,
            registry,
            customs,
            config,
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Reads one record, e.g. to show both sides before an interactive merge.
    pub fn record(&self, entity_type: &str, id: RecordId) -> EngineResult<Record> {
        let schema = self.schema(entity_type)?;
        let conn = self.db.lock()?;
        load_record(&conn, schema, id)
    }

    /// Runs the merge as a dry run. Nothing is written.
    pub fn preview(&self, request: MergeRequest) -> EngineResult<MergeResult> {
        self.merge(request.dry_run(true))
    }

    /// Merges the request's source into its target.
    ///
    /// On success the target holds the resolved values, the source's related
    /// rows point at the target (or were skipped or deleted as reported), the
    /// source is archived if requested and deleted, and one log entry exists.
    /// On any error nothing has changed.
    pub fn merge(&self, request: MergeRequest) -> EngineResult<MergeResult> {
        let schema = self.schema(&request.entity_type)?;
        if request.source_id == request.target_id {
            return Err(MergeError::InvalidRequest(format!(
                "cannot merge {} #{} into itself",
                request.entity_type, request.source_id
            )));
        }
        let strategy_map = effective_strategies(schema, &request)?;

        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let source = load_record(&tx, schema, request.source_id)?;
        let target = load_record(&tx, schema, request.target_id)?;

        let resolver = Resolver::new(&self.customs, &self.config.default_separator);
        let mut resolved_fields = BTreeMap::new();
        let mut updates = Map::new();
        for field in &schema.fields {
            let directive = strategy_map.fields.get(&field.name).unwrap_or(&field.strategy);
            match resolver.resolve(field, directive, &source, &target)? {
                Resolution::Set { value, note } => {
                    updates.insert(field.name.clone(), field.field_type.encode(value.clone()));
                    resolved_fields.insert(field.name.clone(), ResolvedField { value, note });
                }
                Resolution::Unchanged => {}
            }
        }

        let mut relation_actions = BTreeMap::new();
        for relation in &schema.relations {
            let directive = strategy_map
                .relations
                .get(&relation.name)
                .unwrap_or(&relation.strategy);
            let counts = reassign_relation(
                &tx,
                relation,
                directive,
                source.id,
                target.id,
                request.dry_run,
                &self.customs,
            )?;
            relation_actions.insert(relation.name.clone(), counts);
        }

        if request.dry_run {
            tx.rollback()?;
            debug!(
                "Previewed merge of {} #{} into #{}",
                schema.entity_type, source.id, target.id
            );
            return Ok(MergeResult {
                entity_type: schema.entity_type.clone(),
                source_id: source.id,
                target_id: target.id,
                resolved_fields,
                relation_actions,
                archived: false,
                dry_run: true,
                log_id: None,
            });
        }

        let log_id = MergeLogId::new();
        let performed_at = audit::now();

        let archive = request.archive.unwrap_or(self.config.archive_by_default);
        let snapshot = if archive {
            self.registry
                .archive_hook(&schema.entity_type)
                .and_then(|hook| hook.archive(&source))
        } else {
            None
        };
        if let Some(snapshot) = &snapshot {
            audit::write_archive(&tx, log_id, snapshot, &performed_at)?;
        } else if archive {
            debug!("{} opts out of archiving; deleting #{} without a copy", schema.entity_type, source.id);
        }

        // The source goes first so values moving to the target can't trip a
        // unique column on the entity table.
        delete_row(&tx, &schema.table, &schema.id_column, source.id.get())?;
        update_row(&tx, &schema.table, &schema.id_column, target.id.get(), &updates)?;
        let after = load_record(&tx, schema, target.id)?;

        let entry = MergeLogEntry {
            id: log_id,
            entity_type: schema.entity_type.clone(),
            source_id: source.id,
            target_id: target.id,
            source_snapshot: source.snapshot(),
            target_snapshot: target.snapshot(),
            target_snapshot_after: after.snapshot(),
            strategy_map,
            relation_actions: relation_actions.clone(),
            performed_by: request.actor.clone(),
            performed_at,
        };
        audit::write_entry(&tx, &entry)?;
        tx.commit()?;

        info!(
            "Merged {} #{} into #{} ({} fields, {} relations) by {}",
            schema.entity_type,
            source.id,
            target.id,
            resolved_fields.len(),
            relation_actions.len(),
            request.actor
        );

        Ok(MergeResult {
            entity_type: schema.entity_type.clone(),
            source_id: source.id,
            target_id: target.id,
            resolved_fields,
            relation_actions,
            archived: snapshot.is_some(),
            dry_run: false,
            log_id: Some(log_id),
        })
    }

    /// Merges every candidate except `template.target_id` into the target,
    /// one committed merge at a time, in candidate order.
    ///
    /// `template` supplies everything but the source. The chain stops at the
    /// first failure; earlier merges stay committed.
    pub fn merge_chain(
        &self,
        template: &MergeRequest,
        candidates: &[RecordId],
    ) -> EngineResult<ChainOutcome> {
        let sources = chain_sources(candidates, template.target_id)?;
        let mut completed = Vec::with_capacity(sources.len());

        for (i, &source_id) in sources.iter().enumerate() {
            match self.merge(template.with_source(source_id)) {
                Ok(result) => completed.push(result),
                Err(error) => {
                    warn!(
                        "Chain into {} #{} stopped at #{}: {}",
                        template.entity_type, template.target_id, source_id, error
                    );
                    return Ok(ChainOutcome {
                        completed,
                        failed: Some(ChainFailure { source_id, error }),
                        remaining: sources[i + 1..].to_vec(),
                    });
                }
            }
        }

        Ok(ChainOutcome {
            completed,
            failed: None,
            remaining: Vec::new(),
        })
    }

    /// Reads the merge log, newest first.
    pub fn merge_log(&self, query: &MergeLogQuery) -> EngineResult<Vec<MergeLogEntry>> {
        audit::load_entries(&*self.db.lock()?, query)
    }

    pub fn merge_log_count(&self, query: &MergeLogQuery) -> EngineResult<usize> {
        audit::count_entries(&*self.db.lock()?, query)
    }

    /// Archived snapshots of a record that was merged away.
    pub fn archived(&self, entity_type: &str, id: RecordId) -> EngineResult<Vec<ArchivedRecord>> {
        audit::load_archived(&*self.db.lock()?, entity_type, id)
    }

    fn schema(&self, entity_type: &str) -> EngineResult<&EntityType> {
        self.registry.get(entity_type).ok_or_else(|| {
            MergeError::InvalidRequest(format!("entity type `{entity_type}` is not registered for merging"))
        })
    }
}

/// Entity defaults with the request's overrides applied. Overrides replace a
/// default wholesale.
fn effective_strategies(schema: &EntityType, request: &MergeRequest) -> EngineResult<StrategyMap> {
    let mut fields = schema.default_field_strategies();
    for (name, raw) in &request.field_overrides {
        if schema.field(name).is_none() {
            return Err(ConfigError::UnknownField {
                entity_type: schema.entity_type.clone(),
                field: name.clone(),
            }
            .into());
        }
        fields.insert(name.clone(), StrategyDirective::normalize(raw.clone())?);
    }

    let mut relations = schema.default_relation_strategies();
    for (name, raw) in &request.relation_overrides {
        if schema.relation(name).is_none() {
            return Err(ConfigError::UnknownRelation {
                entity_type: schema.entity_type.clone(),
                relation: name.clone(),
            }
            .into());
        }
        relations.insert(name.clone(), RelationDirective::normalize(raw.clone())?);
    }

    Ok(StrategyMap { fields, relations })
}

/// Loads a record with its declared fields decoded from their stored form.
fn load_record(conn: &Connection, schema: &EntityType, id: RecordId) -> EngineResult<Record> {
    let mut fields = fetch_row(conn, &schema.table, &schema.id_column, id.get())?.ok_or_else(|| {
        MergeError::InvalidRequest(format!("{} #{} does not exist", schema.entity_type, id))
    })?;
    for field in &schema.fields {
        if let Some(value) = fields.get_mut(&field.name) {
            *value = field.field_type.decode(value.take());
        }
    }
    Ok(Record::new(id, schema.entity_type.clone(), fields))
}
