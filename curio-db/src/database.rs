use crate::error::{DbError, DbResult};
use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// How long a statement waits on another connection's lock (ms).
    pub busy_timeout_ms: u64,
    /// Enforce `REFERENCES` constraints.
    pub foreign_keys: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            foreign_keys: true,
        }
    }
}

/// A shared SQLite connection.
///
/// Cloning shares the same connection. Merges from different processes or
/// different `Database` handles on the same file are serialized by SQLite's
/// own locking, not by this mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) a database at the given path.
    pub fn open(path: impl AsRef<Path>, config: &DbConfig) -> DbResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!("Opened database at {}", path.display());
        Self::configure(conn, config)
    }

    /// Opens an in-memory database with default settings.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_in_memory_with(&DbConfig::default())
    }

    pub fn open_in_memory_with(config: &DbConfig) -> DbResult<Self> {
        Self::configure(Connection::open_in_memory()?, config)
    }

    fn configure(conn: Connection, config: &DbConfig) -> DbResult<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the connection for exclusive use by the caller.
    pub fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Runs a batch of statements (schema setup, fixtures).
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

/// True when `err` is SQLite lock contention.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
