//! Merge log and source archive.
//!
//! Both tables live in the same database as the merged records so entries
//! are written inside the merge transaction. Rows are append-only.

use crate::error::{EngineResult, MergeError};
use crate::relations::RelationCounts;
use chrono::{DateTime, SecondsFormat, Utc};
use curio_db::DbError;
use curio_model::{ArchivedSnapshot, RelationDirective, StrategyDirective};
use curio_types::{Actor, MergeLogId, RecordId};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The directives a merge actually applied, after overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMap {
    pub fields: BTreeMap<String, StrategyDirective>,
    pub relations: BTreeMap<String, RelationDirective>,
}

/// One committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub id: MergeLogId,
    pub entity_type: String,
    pub source_id: RecordId,
    pub target_id: RecordId,
    /// Source row before the merge.
    pub source_snapshot: Value,
    /// Target row before the merge.
    pub target_snapshot: Value,
    /// Target row after the merge.
    pub target_snapshot_after: Value,
    pub strategy_map: StrategyMap,
    pub relation_actions: BTreeMap<String, RelationCounts>,
    pub performed_by: Actor,
    pub performed_at: DateTime<Utc>,
}

/// A source snapshot kept for recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub merge_log_id: MergeLogId,
    pub snapshot: ArchivedSnapshot,
    pub archived_at: DateTime<Utc>,
}

/// Filters for reading the merge log. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeLogQuery {
    pub entity_type: Option<String>,
    /// Matches entries where the record was either source or target.
    pub record_id: Option<RecordId>,
    pub performed_by: Option<Actor>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for MergeLogQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            record_id: None,
            performed_by: None,
            since: None,
            until: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl MergeLogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn involving(mut self, record_id: RecordId) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn performed_by(mut self, actor: impl Into<Actor>) -> Self {
        self.performed_by = Some(actor.into());
        self
    }

    /// Entries with `since <= performed_at < until`.
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut bound = Vec::new();
        if let Some(entity_type) = &self.entity_type {
            bound.push(SqlValue::Text(entity_type.clone()));
            clauses.push(format!("entity_type = ?{}", bound.len()));
        }
        if let Some(id) = self.record_id {
            bound.push(SqlValue::Integer(id.get()));
            clauses.push(format!("(source_id = ?{0} OR target_id = ?{0})", bound.len()));
        }
        if let Some(actor) = &self.performed_by {
            bound.push(SqlValue::Text(actor.as_str().to_string()));
            clauses.push(format!("performed_by = ?{}", bound.len()));
        }
        if let Some(since) = self.since {
            bound.push(SqlValue::Integer(since.timestamp_millis()));
            clauses.push(format!("performed_at_ms >= ?{}", bound.len()));
        }
        if let Some(until) = self.until {
            bound.push(SqlValue::Integer(until.timestamp_millis()));
            clauses.push(format!("performed_at_ms < ?{}", bound.len()));
        }

        if clauses.is_empty() {
            (String::new(), bound)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), bound)
        }
    }
}

/// Creates the log and archive tables if missing.
pub(crate) fn ensure_schema(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS merge_log (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            source_id INTEGER NOT NULL,
            target_id INTEGER NOT NULL,
            source_snapshot TEXT NOT NULL,
            target_snapshot TEXT NOT NULL,
            target_snapshot_after TEXT NOT NULL,
            strategy_map TEXT NOT NULL,
            relation_actions TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            performed_at TEXT NOT NULL,
            performed_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_merge_log_type ON merge_log(entity_type, performed_at_ms);
        CREATE INDEX IF NOT EXISTS idx_merge_log_source ON merge_log(source_id);
        CREATE INDEX IF NOT EXISTS idx_merge_log_target ON merge_log(target_id);

        CREATE TABLE IF NOT EXISTS merge_archive (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            merge_log_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            data TEXT NOT NULL,
            note TEXT,
            archived_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_merge_archive_record ON merge_archive(entity_type, record_id);
        "#,
    )?;
    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| invalid_data(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_log_id(raw: &str) -> EngineResult<MergeLogId> {
    MergeLogId::parse(raw).map_err(|e| invalid_data(format!("bad merge log id {raw:?}: {e}")))
}

fn invalid_data(message: String) -> MergeError {
    MergeError::Database(DbError::InvalidData(message))
}

/// The current time truncated to what the log stores.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub(crate) fn write_entry(conn: &Connection, entry: &MergeLogEntry) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO merge_log (id, entity_type, source_id, target_id, source_snapshot, \
         target_snapshot, target_snapshot_after, strategy_map, relation_actions, \
         performed_by, performed_at, performed_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.id.to_string(),
            entry.entity_type,
            entry.source_id.get(),
            entry.target_id.get(),
            serde_json::to_string(&entry.source_snapshot)?,
            serde_json::to_string(&entry.target_snapshot)?,
            serde_json::to_string(&entry.target_snapshot_after)?,
            serde_json::to_string(&entry.strategy_map)?,
            serde_json::to_string(&entry.relation_actions)?,
            entry.performed_by.as_str(),
            timestamp(&entry.performed_at),
            entry.performed_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

struct RawEntry {
    id: String,
    entity_type: String,
    source_id: i64,
    target_id: i64,
    source_snapshot: String,
    target_snapshot: String,
    target_snapshot_after: String,
    strategy_map: String,
    relation_actions: String,
    performed_by: String,
    performed_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            source_id: row.get(2)?,
            target_id: row.get(3)?,
            source_snapshot: row.get(4)?,
            target_snapshot: row.get(5)?,
            target_snapshot_after: row.get(6)?,
            strategy_map: row.get(7)?,
            relation_actions: row.get(8)?,
            performed_by: row.get(9)?,
            performed_at: row.get(10)?,
        })
    }

    fn decode(self) -> EngineResult<MergeLogEntry> {
        Ok(MergeLogEntry {
            id: parse_log_id(&self.id)?,
            entity_type: self.entity_type,
            source_id: RecordId::new(self.source_id),
            target_id: RecordId::new(self.target_id),
            source_snapshot: serde_json::from_str(&self.source_snapshot)?,
            target_snapshot: serde_json::from_str(&self.target_snapshot)?,
            target_snapshot_after: serde_json::from_str(&self.target_snapshot_after)?,
            strategy_map: serde_json::from_str(&self.strategy_map)?,
            relation_actions: serde_json::from_str(&self.relation_actions)?,
            performed_by: Actor::new(self.performed_by),
            performed_at: parse_timestamp(&self.performed_at)?,
        })
    }
}

/// Loads log entries matching `query`, newest first.
pub fn load_entries(conn: &Connection, query: &MergeLogQuery) -> EngineResult<Vec<MergeLogEntry>> {
    let (filter, mut bound) = query.where_clause();
    bound.push(SqlValue::Integer(query.limit as i64));
    bound.push(SqlValue::Integer(query.offset as i64));
    let sql = format!(
        "SELECT id, entity_type, source_id, target_id, source_snapshot, target_snapshot, \
         target_snapshot_after, strategy_map, relation_actions, performed_by, performed_at \
         FROM merge_log{filter} ORDER BY performed_at_ms DESC, id DESC LIMIT ?{} OFFSET ?{}",
        bound.len() - 1,
        bound.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bound), RawEntry::from_row)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?.decode()?);
    }
    Ok(entries)
}

/// Counts log entries matching `query`, ignoring its paging.
pub fn count_entries(conn: &Connection, query: &MergeLogQuery) -> EngineResult<usize> {
    let (filter, bound) = query.where_clause();
    let sql = format!("SELECT COUNT(*) FROM merge_log{filter}");
    let count: i64 = conn.query_row(&sql, params_from_iter(bound), |row| row.get(0))?;
    Ok(count as usize)
}

pub(crate) fn write_archive(
    conn: &Connection,
    merge_log_id: MergeLogId,
    snapshot: &ArchivedSnapshot,
    archived_at: &DateTime<Utc>,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO merge_archive (merge_log_id, entity_type, record_id, data, note, archived_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            merge_log_id.to_string(),
            snapshot.entity_type,
            snapshot.record_id.get(),
            serde_json::to_string(&snapshot.data)?,
            snapshot.note,
            timestamp(archived_at),
        ],
    )?;
    Ok(())
}

/// Loads every archived snapshot of a record, oldest first.
pub fn load_archived(
    conn: &Connection,
    entity_type: &str,
    record_id: RecordId,
) -> EngineResult<Vec<ArchivedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT merge_log_id, data, note, archived_at FROM merge_archive \
         WHERE entity_type = ?1 AND record_id = ?2 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![entity_type, record_id.get()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut archived = Vec::new();
    for row in rows {
        let (log_id, data, note, archived_at) = row?;
        archived.push(ArchivedRecord {
            merge_log_id: parse_log_id(&log_id)?,
            snapshot: ArchivedSnapshot {
                entity_type: entity_type.to_string(),
                record_id,
                data: serde_json::from_str(&data)?,
                note,
            },
            archived_at: parse_timestamp(&archived_at)?,
        });
    }
    Ok(archived)
}
