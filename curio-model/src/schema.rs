use crate::error::{ConfigError, ConfigResult};
use crate::strategy::{RelationDirective, StrategyDirective};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
});

/// Checks that a table or column name is a plain SQL identifier.
///
/// Registered names are spliced into SQL text, so anything that would need
/// quoting is refused at registration time.
pub fn validate_identifier(name: &str) -> ConfigResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Declares a mergeable entity type: where its rows live, which columns
/// may be merged and how, and which relations point back at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub entity_type: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntityType {
    pub fn new(entity_type: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            id_column: default_id_column(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Registered per-field directives, keyed by field name.
    pub fn default_field_strategies(&self) -> BTreeMap<String, StrategyDirective> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.strategy.clone()))
            .collect()
    }

    /// Registered per-relation directives, keyed by relation name.
    pub fn default_relation_strategies(&self) -> BTreeMap<String, RelationDirective> {
        self.relations
            .iter()
            .map(|r| (r.name.clone(), r.strategy.clone()))
            .collect()
    }

    /// Checks identifiers and internal consistency.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::InvalidRegistration {
            entity_type: self.entity_type.clone(),
            reason,
        };

        if self.entity_type.trim().is_empty() {
            return Err(invalid("entity type name is empty".into()));
        }
        validate_identifier(&self.table)?;
        validate_identifier(&self.id_column)?;

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_identifier(&field.name)?;
            if field.name == self.id_column {
                return Err(invalid(format!("primary key `{}` cannot be merged", field.name)));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field `{}` declared twice", field.name)));
            }
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            if !seen.insert(relation.name.as_str()) {
                return Err(invalid(format!("relation `{}` declared twice", relation.name)));
            }
            relation.validate().map_err(|err| match err {
                ident @ ConfigError::InvalidIdentifier(_) => ident,
                other => invalid(format!("relation `{}`: {other}", relation.name)),
            })?;
        }
        Ok(())
    }
}

/// A column that takes part in merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub strategy: StrategyDirective,
    /// Value written when neither side has one. Falls back to the type's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            strategy: StrategyDirective::default(),
            default: None,
        }
    }

    /// Shorthand for a text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Shorthand for an integer column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Shorthand for a date column (ISO 8601 text).
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    /// Shorthand for a column holding JSON text.
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyDirective) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// The value used when both sides are empty.
    pub fn empty_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.field_type.default_value())
    }
}

/// Storage type of a mergeable column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Integer,
    Real,
    Bool,
    Date,
    /// JSON stored as text; read back as the JSON value it encodes.
    Json,
    Blob,
}

impl FieldType {
    /// The type's default when a field resolves to nothing.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Text => Value::String(String::new()),
            Self::Integer | Self::Real | Self::Bool | Self::Date | Self::Json | Self::Blob => {
                Value::Null
            }
        }
    }

    /// Turns a column value as read from storage into the value merged.
    /// JSON columns parse their text; text that isn't JSON stays a string.
    #[must_use]
    pub fn decode(self, stored: Value) -> Value {
        match (self, stored) {
            (Self::Json, Value::String(text)) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            (_, stored) => stored,
        }
    }

    /// The inverse of [`decode`](Self::decode): the value to write back.
    #[must_use]
    pub fn encode(self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (Self::Json, value) => Value::String(value.to_string()),
            (_, value) => value,
        }
    }
}

/// A table whose rows point back at the entity through a foreign key,
/// either a plain one-to-many table or a many-to-many through table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub table: String,
    pub fk_column: String,
    /// Unique constraints on the related table, as column groups.
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
    /// When a source row that conflicts with a target row may be deleted.
    #[serde(default)]
    pub redundancy: RedundancyRule,
    #[serde(default)]
    pub strategy: RelationDirective,
}

impl RelationDescriptor {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fk_column: fk_column.into(),
            unique_together: Vec::new(),
            redundancy: RedundancyRule::default(),
            strategy: RelationDirective::default(),
        }
    }

    /// Declares a unique constraint over `columns`.
    #[must_use]
    pub fn unique_together(mut self, columns: &[&str]) -> Self {
        self.unique_together
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    #[must_use]
    pub fn redundant_when(mut self, rule: RedundancyRule) -> Self {
        self.redundancy = rule;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RelationDirective) -> Self {
        self.strategy = strategy;
        self
    }

    /// Unique groups that include the foreign key. Only these can be
    /// violated by rewriting it.
    pub fn conflict_groups(&self) -> impl Iterator<Item = &[String]> {
        self.unique_together
            .iter()
            .filter(|group| group.iter().any(|c| *c == self.fk_column))
            .map(Vec::as_slice)
    }

    fn validate(&self) -> ConfigResult<()> {
        validate_identifier(&self.table)?;
        validate_identifier(&self.fk_column)?;
        for group in &self.unique_together {
            if group.is_empty() {
                return Err(ConfigError::InvalidSpec("empty unique group".into()));
            }
            for column in group {
                validate_identifier(column)?;
            }
        }
        if let RedundancyRule::Columns(columns) = &self.redundancy {
            for column in columns {
                validate_identifier(column)?;
            }
        }
        Ok(())
    }
}

/// Which conflicting source rows count as duplicates of their target-side
/// twin and may be deleted instead of left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyRule {
    /// Conflicting rows are only skipped, never deleted.
    #[default]
    Never,
    /// Sharing the unique key is enough.
    KeyOnly,
    /// The listed payload columns must also be equal.
    Columns(Vec<String>),
}
