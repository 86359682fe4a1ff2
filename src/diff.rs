//! Semantic comparison of desired and observed objects
//!
//! The API server drops empty collections and fills in defaults, so plain
//! equality would report drift on every pass. Comparisons here go through
//! JSON with one normalization rule: `null`, empty arrays and empty objects
//! are all treated as absent.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Remove `null`, `[]` and `{}` recursively
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !is_absent(v))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Serialize and normalize; serialization failures compare as absent
fn to_normalized<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value)
        .map(normalize)
        .unwrap_or(Value::Null)
}

/// Equality after normalization
pub fn semantic_eq<T: Serialize>(a: &T, b: &T) -> bool {
    to_normalized(a) == to_normalized(b)
}

/// True if every field set in `desired` has the same value in `observed`.
///
/// Objects are compared key by key, so fields only present in `observed`
/// (server defaults, status) are ignored. Arrays must have the same length
/// and are compared element-wise with the same rule.
pub fn semantic_subset<D: Serialize, O: Serialize>(desired: &D, observed: &O) -> bool {
    value_subset(&to_normalized(desired), &to_normalized(observed))
}

fn value_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d
            .iter()
            .all(|(k, dv)| o.get(k).is_some_and(|ov| value_subset(dv, ov))),
        (Value::Array(d), Value::Array(o)) => {
            d.len() == o.len() && d.iter().zip(o).all(|(dv, ov)| value_subset(dv, ov))
        }
        (d, o) => d == o,
    }
}

/// Map equality where a missing map equals an empty one
pub fn maps_eq(
    a: Option<&BTreeMap<String, String>>,
    b: Option<&BTreeMap<String, String>>,
) -> bool {
    let empty = BTreeMap::new();
    a.unwrap_or(&empty) == b.unwrap_or(&empty)
}
