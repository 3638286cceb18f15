//! Field lookup helpers for JSON log documents

use serde_json::{Map, Value};

/// Fallback message fields, in priority order
pub const MESSAGE_CANDIDATES: &[&str] = &["message", "log.message", "msg", "text"];

/// Fallback level fields, in priority order
pub const LEVEL_CANDIDATES: &[&str] = &["level", "log.level", "severity", "priority"];

/// Look up a field by exact key, then by dotted path through nested objects.
pub fn lookup<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    if !path.contains('.') {
        return None;
    }

    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// First candidate that resolves to a non-null value
pub fn first_match<'a>(doc: &'a Map<String, Value>, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|c| lookup(doc, c))
        .find(|v| !v.is_null())
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten nested objects into dotted keys. Arrays stay as values.
pub fn flatten_into(doc: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (key, value) in doc {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &full, out),
            other => {
                out.insert(full, other.clone());
            }
        }
    }
}
