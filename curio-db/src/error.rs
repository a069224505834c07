//! Error types for the database layer.

use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A previous holder of the connection panicked.
    #[error("database connection mutex poisoned")]
    Poisoned,

    /// Stored data could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl DbError {
    /// True for lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`), which a
    /// caller may retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Sqlite(e) if crate::is_busy(e))
    }
}
