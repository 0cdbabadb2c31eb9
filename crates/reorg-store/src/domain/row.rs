//! # Rows
//!
//! Rows travel as JSON objects (one object per row, `JSONEachRow` style).
//! Column stores commonly quote 64-bit integers in JSON output, so numeric
//! accessors accept both `12` and `"12"`.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One row of a column store table.
pub type Row = Map<String, Value>;

/// Read a value as a signed 64-bit integer, accepting quoted decimals.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a value as a row identifier.
///
/// Missing-ish values (`null`, `""`, `false`) identify nothing and yield
/// `None`; numbers are stringified.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        other => Some(other.to_string()),
    }
}

/// Equality as a column store would compare a column with a literal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (value_as_i64(left), value_as_i64(right)) {
        (Some(a), Some(b)) => a == b,
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => a == b,
            _ => left == right,
        },
    }
}

/// Ordering used by `ORDER BY` and range predicates: numeric when both sides
/// are integers, textual otherwise.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (value_as_i64(left), value_as_i64(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => text(left).cmp(&text(right)),
    }
}

/// Canonical text of a value, used for replacing-key grouping.
pub fn canonical_text(value: &Value) -> String {
    match value_as_i64(value) {
        Some(n) => n.to_string(),
        None => text(value),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
