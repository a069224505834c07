//! Error types for the merge engine.

use curio_db::DbError;
use curio_model::ConfigError;
use serde_json::Value;
use thiserror::Error;

/// Result type for merge operations.
pub type EngineResult<T> = Result<T, MergeError>;

/// Coarse classification of a [`MergeError`], for callers translating
/// failures into user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidMergeRequest,
    ConfigurationError,
    InvalidStrategyValue,
    MissingFieldSelection,
    UnknownCustomStrategy,
    RelationConflict,
    TransactionFailure,
    Storage,
}

/// Errors that can occur while merging.
///
/// Request and configuration errors are raised before anything is written.
/// Everything else aborts the open transaction, so no partial merge persists.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Same source and target, a missing record, or an unknown entity type.
    #[error("invalid merge request: {0}")]
    InvalidRequest(String),

    /// Unknown strategy name or an override naming an undeclared field/relation.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// `WHITELIST` found neither side acceptable.
    #[error("field `{field}`: value {value} is not in the allowed set")]
    InvalidStrategyValue { field: String, value: Value },

    /// `FIELD_SELECTION` without an explicit value.
    #[error("field `{field}` requires an explicitly selected value")]
    MissingFieldSelection { field: String },

    /// `CUSTOM` naming nothing in the registry.
    #[error("no custom strategy `{name}` registered (used by `{used_by}`)")]
    UnknownCustomStrategy { name: String, used_by: String },

    /// A uniqueness conflict on a relation that does not de-duplicate.
    #[error("relation `{relation}`: row {rowid} would duplicate a target row on ({columns})")]
    RelationConflict {
        relation: String,
        rowid: i64,
        columns: String,
    },

    /// Lock timeout or contention. Nothing persisted; the merge may be retried.
    #[error("transaction failed, merge can be retried: {0}")]
    Transaction(rusqlite::Error),

    /// Any other store error.
    #[error(transparent)]
    Database(DbError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MergeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidMergeRequest,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::InvalidStrategyValue { .. } => ErrorKind::InvalidStrategyValue,
            Self::MissingFieldSelection { .. } => ErrorKind::MissingFieldSelection,
            Self::UnknownCustomStrategy { .. } => ErrorKind::UnknownCustomStrategy,
            Self::RelationConflict { .. } => ErrorKind::RelationConflict,
            Self::Transaction(_) => ErrorKind::TransactionFailure,
            Self::Database(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// True when re-invoking the same merge from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

impl From<DbError> for MergeError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(e) if curio_db::is_busy(&e) => Self::Transaction(e),
            other => Self::Database(other),
        }
    }
}

impl From<rusqlite::Error> for MergeError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Sqlite(err).into()
    }
}
