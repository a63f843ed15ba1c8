//! PostgreSQL OID-based text-format value decoding.
//!
//! pgoutput emits column values in text format; this module turns
//! `(typeOID, text)` pairs into the tagged [`Value`] the relation set
//! hands to callers. Unknown OIDs fall back to opaque text rather than an
//! error — only a single column's own decode failure is fatal.

use chrono::NaiveDateTime;
use pgcdc_core::{DecodeError, Value};

// Only the OIDs this decoder treats specially; everything else falls
// through to `Value::Unknown`.
const BOOL: u32 = 16;
const BYTEA: u32 = 17;
const INT8: u32 = 20;
const INT2: u32 = 21;
const INT4: u32 = 23;
const TEXT: u32 = 25;
const JSON: u32 = 114;
const FLOAT4: u32 = 700;
const FLOAT8: u32 = 701;
const BPCHAR: u32 = 1042;
const VARCHAR: u32 = 1043;
const TIMESTAMP: u32 = 1114;
const TIMESTAMPTZ: u32 = 1184;
const NUMERIC: u32 = 1700;
const UUID: u32 = 2950;
const JSONB: u32 = 3802;

// Array OIDs are distinct catalog entries from their element type, e.g.
// `int4[]` is 1007 while `int4` itself is 23 — the server never reuses the
// scalar OID for the array. Only the element types this decoder treats
// specially are listed; an array of anything else falls through to
// `Value::Unknown` per element, same as the scalar case.
fn element_oid(array_oid: u32) -> Option<u32> {
    let oid = match array_oid {
        1000 => BOOL,
        1001 => BYTEA,
        1005 => INT2,
        1007 => INT4,
        1009 => TEXT,
        1014 => BPCHAR,
        1015 => VARCHAR,
        1016 => INT8,
        1021 => FLOAT4,
        1022 => FLOAT8,
        1115 => TIMESTAMP,
        1185 => TIMESTAMPTZ,
        1231 => NUMERIC,
        199 => JSON,
        2951 => UUID,
        3807 => JSONB,
        _ => return None,
    };
    Some(oid)
}

/// Decode one column's raw text representation according to its type OID.
///
/// `column` is only used to label a failure; it carries no semantics here.
pub fn decode_value(column: &str, type_oid: u32, text: &str) -> Result<Value, DecodeError> {
    let fail = |cause: String| DecodeError {
        column: column.to_string(),
        oid: type_oid,
        cause,
    };

    let value = match type_oid {
        BOOL => Value::Bool(text == "t" || text == "true"),
        INT2 | INT4 | INT8 => Value::Int64(text.parse::<i64>().map_err(|e| fail(e.to_string()))?),
        FLOAT4 | FLOAT8 => Value::Float64(text.parse::<f64>().map_err(|e| fail(e.to_string()))?),
        NUMERIC => Value::Numeric(text.to_string()),
        TEXT | VARCHAR | BPCHAR => Value::Text(text.to_string()),
        BYTEA => Value::Bytes(decode_bytea(text).map_err(fail)?),
        UUID => {
            uuid::Uuid::parse_str(text).map_err(|e| fail(e.to_string()))?;
            Value::Text(text.to_string())
        }
        TIMESTAMP => Value::Timestamp(parse_timestamp(text).map_err(fail)?),
        TIMESTAMPTZ => Value::Timestamp(parse_timestamptz(text).map_err(fail)?),
        JSON | JSONB => {
            Value::Json(serde_json::from_str(text).map_err(|e| fail(e.to_string()))?)
        }
        _ if is_array_literal(text) => decode_array(column, type_oid, text)?,
        _ => Value::Unknown(text.to_string()),
    };

    Ok(value)
}

fn is_array_literal(text: &str) -> bool {
    text.starts_with('{') && text.ends_with('}')
}

/// Decode PostgreSQL's `{a,b,c}` one-dimensional text array literal,
/// recursively decoding each element against the array's element type OID
/// (looked up via [`element_oid`], not the array's own OID).
///
/// This is a best-effort splitter: it does not handle nested arrays or
/// quoted commas beyond simple `"..."` quoting, which covers every type
/// this decoder treats specially.
fn decode_array(column: &str, array_oid: u32, text: &str) -> Result<Value, DecodeError> {
    let inner = &text[1..text.len() - 1];
    if inner.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let element_oid = element_oid(array_oid).unwrap_or(array_oid);
    let mut elements = Vec::new();
    for raw in split_array_elements(inner) {
        if raw.eq_ignore_ascii_case("null") {
            elements.push(Value::Null);
            continue;
        }
        let unquoted = unquote(&raw);
        elements.push(decode_value(column, element_oid, &unquoted)?);
    }

    Ok(Value::Array(elements))
}

fn split_array_elements(inner: &str) -> Vec<String> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                elements.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    elements.push(current);
    elements
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].replace("\\\"", "\"")
    } else {
        trimmed.to_string()
    }
}

fn decode_bytea(text: &str) -> Result<Vec<u8>, String> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| format!("expected \\x-prefixed bytea, got {text:?}"))?;
    hex::decode(hex).map_err(|e| e.to_string())
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map_err(|e| e.to_string())
}

fn parse_timestamptz(text: &str) -> Result<NaiveDateTime, String> {
    chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
        .map(|dt| dt.naive_utc())
        .map_err(|e| e.to_string())
}
