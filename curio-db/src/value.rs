//! Conversion between SQLite values and JSON.
//!
//! Integers and reals map to JSON numbers, text to strings, NULL to null.
//! Booleans are written as 0/1, and arrays/objects as JSON text. Blobs are
//! read as `{"$blob": "<hex>"}` and written back as blobs, so a value read
//! from one row can be stored into another unchanged.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

/// Key of the single-entry object standing in for a blob.
pub const BLOB_KEY: &str = "$blob";

/// Wraps raw bytes as the JSON form of a blob.
pub fn blob_value(bytes: &[u8]) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(BLOB_KEY.to_string(), Value::String(hex::encode(bytes)));
    Value::Object(map)
}

/// The bytes of a blob value, or `None` if `value` isn't one.
pub fn blob_bytes(value: &Value) -> Option<Vec<u8>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    hex::decode(map.get(BLOB_KEY)?.as_str()?).ok()
}

/// Reads one SQLite value as JSON.
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => blob_value(bytes),
    }
}

/// Converts a JSON value into something SQLite can bind.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Object(_) => match blob_bytes(value) {
            Some(bytes) => SqlValue::Blob(bytes),
            None => SqlValue::Text(value.to_string()),
        },
        Value::Array(_) => SqlValue::Text(value.to_string()),
    }
}
