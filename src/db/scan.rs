//! # Row Scanning
//!
//! Converts driver rows into the value model: each row becomes a mapping
//! from column name to value, each result set a sequence of rows. The
//! portable driver erases backend-native types down to a small set of
//! kinds, so scanning dispatches on the normalized type name.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::errors::{DbError, DbResult};
use super::QueryOptions;

/// Scan a full result set into a sequence of row mappings.
pub fn scan_rows(rows: &[AnyRow], opts: &QueryOptions) -> DbResult<Value> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(scan_row(row, opts)?);
    }
    Ok(Value::Array(out))
}

/// Scan one row into a column-name keyed mapping.
pub fn scan_row(row: &AnyRow, opts: &QueryOptions) -> DbResult<Value> {
    let mut obj = Map::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let value = decode_column(row, i, col.name(), opts)?;
        obj.insert(col.name().to_string(), value);
    }
    Ok(Value::Object(obj))
}

fn decode_column(row: &AnyRow, index: usize, name: &str, opts: &QueryOptions) -> DbResult<Value> {
    let scan_err = |source| DbError::Scan {
        column: name.to_string(),
        source,
    };

    let raw = row.try_get_raw(index).map_err(scan_err)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    drop(raw);

    let value = match type_name.as_str() {
        "BOOL" | "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index).map_err(scan_err)?),
        "SMALLINT" | "INT2" => {
            Value::Number(Number::from(row.try_get::<i16, _>(index).map_err(scan_err)?))
        }
        "INT" | "INTEGER" | "INT4" => {
            Value::Number(Number::from(row.try_get::<i32, _>(index).map_err(scan_err)?))
        }
        "BIGINT" | "INT8" => {
            Value::Number(Number::from(row.try_get::<i64, _>(index).map_err(scan_err)?))
        }
        "REAL" | "FLOAT4" => {
            float_value(f64::from(row.try_get::<f32, _>(index).map_err(scan_err)?))
        }
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => {
            float_value(row.try_get::<f64, _>(index).map_err(scan_err)?)
        }
        "BLOB" | "BYTEA" | "VARBINARY" => {
            let bytes = row.try_get::<Vec<u8>, _>(index).map_err(scan_err)?;
            Value::String(BASE64.encode(bytes))
        }
        // TEXT and anything the driver surfaces as text.
        _ => {
            let text = row.try_get::<String, _>(index).map_err(scan_err)?;
            text_value(text, opts)
        }
    };
    Ok(value)
}

fn float_value(f: f64) -> Value {
    // Non-finite floats have no JSON form.
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn text_value(text: String, opts: &QueryOptions) -> Value {
    if opts.parse_json {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str(&text) {
                return parsed;
            }
        }
    }
    Value::String(text)
}
