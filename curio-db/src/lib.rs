//! SQLite connection management for Curio.
//!
//! The merge engine works on arbitrary collection tables, so this crate
//! offers row access by table and column name instead of typed queries:
//! rows come back as JSON objects and go in from JSON maps. Names are always
//! quoted; registration in `curio-model` additionally restricts them to plain
//! identifiers.

mod database;
mod error;
mod rows;
mod value;

pub use database::{is_busy, Database, DbConfig};
pub use error::{DbError, DbResult};
pub use rows::{
    count_where, delete_by_rowid, delete_row, fetch_row, fetch_rows_where, quote_ident,
    update_fk_by_rowid, update_row, RelatedRow,
};
pub use value::{blob_bytes, blob_value, json_to_sql, sql_to_json, BLOB_KEY};

pub use rusqlite;
