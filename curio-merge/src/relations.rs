//! Relation reassignment.
//!
//! Rows of a related table that point at the source are moved to the target.
//! A row that would collide with one of the target's rows under a uniqueness
//! constraint stays on the source and is counted as skipped; if the relation
//! declares such twins redundant it is deleted instead.

use crate::custom::CustomRegistry;
use crate::error::{EngineResult, MergeError};
use curio_db::{count_where, delete_by_rowid, fetch_rows_where, update_fk_by_rowid, RelatedRow};
use curio_model::{RedundancyRule, RelationAction, RelationDescriptor, RelationDirective};
use curio_types::RecordId;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// What happened to one relation's rows.
///
/// A real run fills `updated`/`deleted`; a dry run fills `would_update`/
/// `would_delete` with the same numbers the real run would produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCounts {
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub would_update: usize,
    pub would_delete: usize,
}

impl RelationCounts {
    /// Rows that stay attached to the source after the relation ran.
    pub fn left_on_source(&self) -> usize {
        self.skipped
            .saturating_sub(self.deleted)
            .saturating_sub(self.would_delete)
    }
}

/// Applies `directive` to `relation`, moving rows from `source` to `target`.
///
/// Must run inside the caller's transaction. With `dry_run` nothing is
/// written.
pub fn reassign_relation(
    conn: &Connection,
    relation: &RelationDescriptor,
    directive: &RelationDirective,
    source: RecordId,
    target: RecordId,
    dry_run: bool,
    customs: &CustomRegistry,
) -> EngineResult<RelationCounts> {
    let counts = match directive.action() {
        RelationAction::Skip => RelationCounts {
            skipped: count_where(conn, &relation.table, &relation.fk_column, source.get())?,
            ..RelationCounts::default()
        },
        RelationAction::Custom => {
            let name = directive.callable_name().unwrap_or_default();
            let handler = customs.relation_handler(name).ok_or_else(|| {
                MergeError::UnknownCustomStrategy {
                    name: name.to_string(),
                    used_by: relation.name.clone(),
                }
            })?;
            handler.reassign(conn, relation, source, target, dry_run)?
        }
        RelationAction::Reassign | RelationAction::Merge => reassign_rows(
            conn,
            relation,
            directive.resolves_conflicts(),
            source,
            target,
            dry_run,
        )?,
    };

    debug!(
        "Relation {} ({}): {:?}{}",
        relation.name,
        directive.action(),
        counts,
        if dry_run { " [dry run]" } else { "" }
    );
    Ok(counts)
}

fn reassign_rows(
    conn: &Connection,
    relation: &RelationDescriptor,
    resolve_conflicts: bool,
    source: RecordId,
    target: RecordId,
    dry_run: bool,
) -> EngineResult<RelationCounts> {
    let mut counts = RelationCounts::default();
    let source_rows = fetch_rows_where(conn, &relation.table, &relation.fk_column, source.get())?;
    if source_rows.is_empty() {
        return Ok(counts);
    }

    let groups: Vec<&[String]> = relation.conflict_groups().collect();
    let target_rows = if groups.is_empty() {
        Vec::new()
    } else {
        fetch_rows_where(conn, &relation.table, &relation.fk_column, target.get())?
    };
    let index = ConflictIndex::build(relation, &groups, &target_rows, target);

    for row in &source_rows {
        match index.twin_of(relation, &groups, row, target) {
            None => {
                if dry_run {
                    counts.would_update += 1;
                } else {
                    update_fk_by_rowid(conn, &relation.table, &relation.fk_column, target.get(), row.rowid)?;
                    counts.updated += 1;
                }
            }
            Some((group, twin)) => {
                if !resolve_conflicts {
                    return Err(MergeError::RelationConflict {
                        relation: relation.name.clone(),
                        rowid: row.rowid,
                        columns: group.join(", "),
                    });
                }
                counts.skipped += 1;
                if is_redundant(&relation.redundancy, row, &target_rows[twin]) {
                    if dry_run {
                        counts.would_delete += 1;
                    } else {
                        delete_by_rowid(conn, &relation.table, row.rowid)?;
                        counts.deleted += 1;
                    }
                }
            }
        }
    }

    let left = counts.left_on_source();
    if left > 0 {
        warn!(
            "{} row(s) of {} conflict with target #{} and stay on source #{}",
            left, relation.name, target, source
        );
    }
    Ok(counts)
}

/// Target rows keyed by each conflict group's column values.
struct ConflictIndex {
    by_group: Vec<HashMap<String, usize>>,
}

impl ConflictIndex {
    fn build(
        relation: &RelationDescriptor,
        groups: &[&[String]],
        target_rows: &[RelatedRow],
        target: RecordId,
    ) -> Self {
        let by_group = groups
            .iter()
            .map(|group| {
                let mut keys = HashMap::new();
                for (i, row) in target_rows.iter().enumerate() {
                    if let Some(key) = conflict_key(relation, group, row, target) {
                        keys.entry(key).or_insert(i);
                    }
                }
                keys
            })
            .collect();
        Self { by_group }
    }

    /// The first group under which `row`, moved to `target`, would collide,
    /// with the index of the colliding target row.
    fn twin_of<'g>(
        &self,
        relation: &RelationDescriptor,
        groups: &[&'g [String]],
        row: &RelatedRow,
        target: RecordId,
    ) -> Option<(&'g [String], usize)> {
        groups.iter().zip(&self.by_group).find_map(|(group, keys)| {
            let key = conflict_key(relation, group, row, target)?;
            keys.get(&key).map(|&twin| (*group, twin))
        })
    }
}

/// The row's values for `group` with the foreign key replaced by `fk_value`.
/// `None` when any column is NULL: SQL uniqueness never matches NULLs.
fn conflict_key(
    relation: &RelationDescriptor,
    group: &[String],
    row: &RelatedRow,
    fk_value: RecordId,
) -> Option<String> {
    let mut parts = Vec::with_capacity(group.len());
    for column in group {
        let value = if *column == relation.fk_column {
            Value::from(fk_value.get())
        } else {
            row.get(column).clone()
        };
        if value.is_null() {
            return None;
        }
        parts.push(key_part(value));
    }
    Some(Value::Array(parts).to_string())
}

/// SQLite compares `7` and `7.0` as equal, so integral reals key as integers.
fn key_part(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            Value::from(f as i64)
        }
        _ => value,
    }
}

fn is_redundant(rule: &RedundancyRule, row: &RelatedRow, twin: &RelatedRow) -> bool {
    match rule {
        RedundancyRule::Never => false,
        RedundancyRule::KeyOnly => true,
        RedundancyRule::Columns(columns) => columns
            .iter()
            .all(|c| key_part(row.get(c).clone()) == key_part(twin.get(c).clone())),
    }
}
