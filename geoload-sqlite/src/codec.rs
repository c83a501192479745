//! Mapping between [`Value`] and SQLite storage classes.
//!
//! Geometries are stored as `serde_json` text of `geo::Geometry`, dates as
//! ISO 8601 text and GUIDs as braced upper-case text.

use chrono::NaiveDateTime;
use geo::Geometry;
use geoload_core::{FieldType, Value, braced_upper};
use rusqlite::types::{Value as SqlValue, ValueRef};
use uuid::Uuid;

use crate::SqliteStoreError;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATE_FORMAT_SPACED: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Quote an identifier for use in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column declaration for a field type. Object ids become the rowid alias.
pub(crate) const fn column_decl(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::ObjectId => "INTEGER PRIMARY KEY AUTOINCREMENT",
        FieldType::SmallInt | FieldType::Int => "INTEGER",
        FieldType::Float | FieldType::Double => "REAL",
        FieldType::String
        | FieldType::Date
        | FieldType::Guid
        | FieldType::GlobalId
        | FieldType::Geometry => "TEXT",
        FieldType::Blob | FieldType::Raster => "BLOB",
    }
}

/// Field type inferred from a declared SQLite column type.
pub(crate) fn infer_field_type(declared: &str, primary_key: bool) -> FieldType {
    let upper = declared.to_uppercase();
    if upper.contains("INT") {
        if primary_key {
            FieldType::ObjectId
        } else {
            FieldType::Int
        }
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        FieldType::Double
    } else if upper.contains("BLOB") {
        FieldType::Blob
    } else if upper.contains("DATE") || upper.contains("TIME") {
        FieldType::Date
    } else {
        FieldType::String
    }
}

/// Encode a value for binding.
pub(crate) fn encode(value: &Value, column: &str) -> Result<SqlValue, SqliteStoreError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::SmallInt(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(f64::from(*v)),
        Value::Double(v) => SqlValue::Real(*v),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Date(v) => SqlValue::Text(v.format(DATE_FORMAT).to_string()),
        Value::Guid(v) => SqlValue::Text(braced_upper(*v)),
        Value::Geometry(geometry) => SqlValue::Text(encode_geometry(geometry, column)?),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    })
}

pub(crate) fn encode_geometry(
    geometry: &Geometry<f64>,
    column: &str,
) -> Result<String, SqliteStoreError> {
    serde_json::to_string(geometry).map_err(|source| SqliteStoreError::Json {
        column: column.to_owned(),
        source,
    })
}

/// Decode a stored value for a field of `field_type`.
///
/// Values whose storage class does not match the declared type fall back to
/// their natural representation.
pub(crate) fn decode(
    field_type: FieldType,
    value: ValueRef<'_>,
    column: &str,
) -> Result<Value, SqliteStoreError> {
    match (field_type, value) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (FieldType::SmallInt, ValueRef::Integer(v)) => i16::try_from(v)
            .map(Value::SmallInt)
            .map_err(|_| invalid(column, format!("{v} does not fit a small integer"))),
        (FieldType::Float, ValueRef::Real(v)) => Ok(Value::Float(narrow(v))),
        (FieldType::Date, ValueRef::Text(raw)) => {
            let text = utf8(raw, column)?;
            parse_date(text)
                .map(Value::Date)
                .ok_or_else(|| invalid(column, format!("{text} is not a date")))
        }
        (FieldType::Guid | FieldType::GlobalId, ValueRef::Text(raw)) => {
            let text = utf8(raw, column)?;
            Uuid::parse_str(text)
                .map(Value::Guid)
                .map_err(|err| invalid(column, err.to_string()))
        }
        (FieldType::Geometry, ValueRef::Text(text)) => serde_json::from_slice(text)
            .map(Value::Geometry)
            .map_err(|source| SqliteStoreError::Json {
                column: column.to_owned(),
                source,
            }),
        (_, other) => decode_untyped(other, column),
    }
}

/// Decode a value without a declared type.
pub(crate) fn decode_untyped(value: ValueRef<'_>, column: &str) -> Result<Value, SqliteStoreError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(text) => Value::String(utf8(text, column)?.to_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

/// Field type suggested by a value's storage class.
pub(crate) const fn storage_type(value: ValueRef<'_>) -> Option<FieldType> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some(FieldType::Int),
        ValueRef::Real(_) => Some(FieldType::Double),
        ValueRef::Text(_) => Some(FieldType::String),
        ValueRef::Blob(_) => Some(FieldType::Blob),
    }
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, DATE_FORMAT_SPACED))
        .ok()
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "FLOAT fields hold single-precision values"
)]
fn narrow(value: f64) -> f32 {
    value as f32
}

fn utf8<'a>(bytes: &'a [u8], column: &str) -> Result<&'a str, SqliteStoreError> {
    std::str::from_utf8(bytes).map_err(|err| invalid(column, err.to_string()))
}

fn invalid(column: &str, message: String) -> SqliteStoreError {
    SqliteStoreError::InvalidValue {
        column: column.to_owned(),
        message,
    }
}
