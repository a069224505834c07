//! Core type definitions for Curio.
//!
//! This crate defines the identifiers shared by every layer of the merge
//! engine:
//! - Record identifiers (the integer primary keys of collection tables)
//! - Merge log identifiers (UUID v7, time-ordered)
//! - The opaque acting user recorded on audit entries
//!
//! Domain tables (accessions, specimens, field slips, ...) are described by
//! registration in `curio-model`, not here.

mod actor;
mod ids;

pub use actor::Actor;
pub use ids::{MergeLogId, RecordId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),
}
