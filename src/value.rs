//! Scalar values and field types
//!
//! Every field of an entity type has one of a small set of semantic types.
//! Values travel to SQLite as bound parameters and come back through
//! [`Value::decode`], which restores the semantic type (booleans, JSON)
//! that SQLite itself does not keep.

use crate::Result;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Text,
    Real,
    Boolean,
    /// Raw bytes
    Blob,
    /// Any JSON document, stored as text
    Json,
}

impl FieldType {
    /// Declared SQL column type used when creating or extending a table
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Text => "TEXT",
            FieldType::Real => "REAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Blob => "BLOB",
            FieldType::Json => "JSON",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Text => "text",
            FieldType::Real => "real",
            FieldType::Boolean => "boolean",
            FieldType::Blob => "blob",
            FieldType::Json => "json",
        }
    }

    /// Map a declared column type back to a field type.
    ///
    /// Follows SQLite's affinity rules for foreign declarations
    /// (`VARCHAR(20)` is text, `BIGINT` is integer, ...).
    pub fn from_sql_type(declared: &str) -> Option<FieldType> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            Some(FieldType::Boolean)
        } else if upper.contains("JSON") {
            Some(FieldType::Json)
        } else if upper.contains("INT") {
            Some(FieldType::Integer)
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Some(FieldType::Text)
        } else if upper.is_empty() || upper.contains("BLOB") {
            Some(FieldType::Blob)
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Some(FieldType::Real)
        } else {
            None
        }
    }

    /// Convert a value into this field's representation.
    ///
    /// Returns `None` when the value cannot be stored in a field of this type.
    /// `Null` is accepted by every type.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (FieldType::Integer, v @ Value::Integer(_)) => Some(v),
            (FieldType::Real, v @ Value::Real(_)) => Some(v),
            (FieldType::Real, Value::Integer(i)) => Some(Value::Real(i as f64)),
            (FieldType::Text, v @ Value::Text(_)) => Some(v),
            (FieldType::Boolean, v @ Value::Boolean(_)) => Some(v),
            (FieldType::Blob, v @ Value::Blob(_)) => Some(v),
            (FieldType::Json, other) => other.into_json().map(Value::Json),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Integer(i) => Some(i.into()),
            Value::Real(r) => serde_json::Number::from_f64(r).map(serde_json::Value::Number),
            Value::Text(s) => Some(serde_json::Value::String(s)),
            Value::Boolean(b) => Some(serde_json::Value::Bool(b)),
            Value::Json(j) => Some(j),
            Value::Blob(_) => None,
        }
    }

    /// Decode a raw SQLite value, restoring the semantic type when known
    pub fn decode(raw: ValueRef<'_>, ty: Option<FieldType>) -> Result<Value> {
        let value = match raw {
            ValueRef::Null => return Ok(Value::Null),
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(
                std::str::from_utf8(t)
                    .map_err(rusqlite::Error::Utf8Error)?
                    .to_string(),
            ),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        };

        Ok(match (ty, value) {
            (Some(FieldType::Boolean), Value::Integer(i)) => Value::Boolean(i != 0),
            (Some(FieldType::Boolean), Value::Real(r)) => Value::Boolean(r != 0.0),
            (Some(FieldType::Real), Value::Integer(i)) => Value::Real(i as f64),
            (Some(FieldType::Json), Value::Text(text)) => Value::Json(serde_json::from_str(&text)?),
            // blobs and non-finite reals have no JSON form; keep them as stored
            (Some(FieldType::Json), other) => match other.clone().into_json() {
                Some(json) => Value::Json(json),
                None => other,
            },
            (_, value) => value,
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Json(json) => {
                let text = serde_json::to_string(json)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(SqlValue::Text(text))
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:?}", r),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

/// Render a bound parameter list, e.g. `[16, 50]`
pub fn format_params(params: &[Value]) -> String {
    let rendered: Vec<String> = params.iter().map(|v| v.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

/// Render a statement the way debug mode emits it: SQL text, then parameters
pub fn format_statement(sql: &str, params: &[Value]) -> String {
    format!("{} {}", sql, format_params(params))
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
