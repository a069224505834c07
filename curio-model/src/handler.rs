use crate::Record;
use curio_types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recoverable copy of a record taken just before it is merged away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedSnapshot {
    pub entity_type: String,
    pub record_id: RecordId,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ArchivedSnapshot {
    /// Captures the full state of `record`.
    pub fn capture(record: &Record) -> Self {
        Self {
            entity_type: record.entity_type.clone(),
            record_id: record.id,
            data: record.snapshot(),
            note: None,
        }
    }
}

/// Optional per-entity-type hook run on the source record before it is
/// deleted by a merge.
///
/// Most entity types do NOT need to implement this: the default captures the
/// whole row. Implement it to trim large columns, attach a note, or opt a
/// type out of archiving by returning `None`.
pub trait ArchiveHook: Send + Sync {
    fn archive(&self, record: &Record) -> Option<ArchivedSnapshot> {
        Some(ArchivedSnapshot::capture(record))
    }
}

/// Archives the full row. Used when a type registers no hook.
pub struct SnapshotArchive;

impl ArchiveHook for SnapshotArchive {}

/// Never archives; the source is deleted without a recovery copy.
pub struct NoArchive;

impl ArchiveHook for NoArchive {
    fn archive(&self, _record: &Record) -> Option<ArchivedSnapshot> {
        None
    }
}
