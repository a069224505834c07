use curio_types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// One row of a collection table.
///
/// Column values are held as JSON so the merge engine can treat every
/// entity type (accession, specimen, field slip, ...) through one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub entity_type: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: RecordId, entity_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Column value, or JSON null when the column is absent.
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Extract a string column.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).as_str()
    }

    /// Extract an integer column.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).as_i64()
    }

    /// Full serialized state, as stored in audit snapshots.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
