use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decoded PostgreSQL column value.
///
/// Modeled as a tagged variant rather than an untyped container so that
/// downstream handlers avoid runtime introspection when consuming
/// `RowEvent::body`. `Numeric` keeps the server's original text
/// representation to preserve arbitrary precision and scale; `Unknown`
/// is the opaque-text fallback for OIDs the relation set doesn't decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(chrono::NaiveDateTime),
    Numeric(String),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Unknown(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// `columnName → decodedValue`, ordered by the relation's column order so
/// that serialization and logging are deterministic.
pub type RowBody = BTreeMap<String, Value>;
