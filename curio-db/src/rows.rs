//! Row access by table and column name.
//!
//! All functions take a plain `&Connection`; a `rusqlite::Transaction`
//! derefs to one, so they run inside the caller's transaction.

use crate::error::DbResult;
use crate::value::{json_to_sql, sql_to_json};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

/// A row of a related table, addressed by its `rowid`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRow {
    pub rowid: i64,
    pub columns: Map<String, Value>,
}

impl RelatedRow {
    pub fn get(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.columns.get(column).unwrap_or(&NULL)
    }
}

/// Quotes an identifier for splicing into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn row_to_map(row: &Row<'_>, names: &[String], offset: usize) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::new();
    for (i, name) in names.iter().enumerate().skip(offset) {
        map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
    }
    Ok(map)
}

/// Loads one row by primary key as a column map.
pub fn fetch_row(
    conn: &Connection,
    table: &str,
    id_column: &str,
    id: i64,
) -> DbResult<Option<Map<String, Value>>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(id_column)
    );
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let row = stmt
        .query_row(params![id], |row| row_to_map(row, &names, 0))
        .optional()?;
    Ok(row)
}

/// Loads every row whose `column` equals `value`, in `rowid` order.
pub fn fetch_rows_where(
    conn: &Connection,
    table: &str,
    column: &str,
    value: i64,
) -> DbResult<Vec<RelatedRow>> {
    let sql = format!(
        "SELECT rowid, * FROM {} WHERE {} = ?1 ORDER BY rowid",
        quote_ident(table),
        quote_ident(column)
    );
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let rows = stmt.query_map(params![value], |row| {
        Ok(RelatedRow {
            rowid: row.get(0)?,
            columns: row_to_map(row, &names, 1)?,
        })
    })?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Counts rows whose `column` equals `value`.
pub fn count_where(conn: &Connection, table: &str, column: &str, value: i64) -> DbResult<usize> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(column)
    );
    let count: i64 = conn.query_row(&sql, params![value], |row| row.get(0))?;
    Ok(count as usize)
}

/// Writes `values` onto the row with the given primary key in one statement.
/// Returns the number of rows changed (0 or 1).
pub fn update_row(
    conn: &Connection,
    table: &str,
    id_column: &str,
    id: i64,
    values: &Map<String, Value>,
) -> DbResult<usize> {
    if values.is_empty() {
        return Ok(0);
    }
    let assignments: Vec<String> = values
        .keys()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", quote_ident(column), i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(table),
        assignments.join(", "),
        quote_ident(id_column),
        values.len() + 1
    );
    let mut bound: Vec<rusqlite::types::Value> = values.values().map(json_to_sql).collect();
    bound.push(rusqlite::types::Value::Integer(id));
    Ok(conn.execute(&sql, params_from_iter(bound))?)
}

/// Points one related row's foreign key at `new_fk`.
pub fn update_fk_by_rowid(
    conn: &Connection,
    table: &str,
    fk_column: &str,
    new_fk: i64,
    rowid: i64,
) -> DbResult<usize> {
    let sql = format!(
        "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
        quote_ident(table),
        quote_ident(fk_column)
    );
    Ok(conn.execute(&sql, params![new_fk, rowid])?)
}

/// Deletes one related row.
pub fn delete_by_rowid(conn: &Connection, table: &str, rowid: i64) -> DbResult<usize> {
    let sql = format!("DELETE FROM {} WHERE rowid = ?1", quote_ident(table));
    Ok(conn.execute(&sql, params![rowid])?)
}

/// Deletes one row by primary key.
pub fn delete_row(conn: &Connection, table: &str, id_column: &str, id: i64) -> DbResult<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(id_column)
    );
    Ok(conn.execute(&sql, params![id])?)
}
