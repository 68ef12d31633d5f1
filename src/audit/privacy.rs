//! Privacy filter for audit metadata.
//!
//! Strips personally identifying fields before anything reaches disk. The
//! filter walks nested objects and arrays, so nesting cannot smuggle a denied
//! key through. Keys are matched against a denylist; string values shaped like
//! phone numbers are dropped regardless of their key.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

static DENYLIST: OnceLock<Option<Regex>> = OnceLock::new();

fn denylist() -> Option<&'static Regex> {
    DENYLIST
        .get_or_init(|| {
            Regex::new(
                r"(?i)(original[_-]?name|original[_-]?file|file[_-]?name|customer|phone|mobile|e[_-]?mail|full[_-]?name|first[_-]?name|last[_-]?name|user[_-]?name|contact|local[_-]?path|file[_-]?path)",
            )
            .map_err(|e| tracing::error!("privacy_denylist_invalid: {}", e))
            .ok()
        })
        .as_ref()
}

/// Whether a metadata key names personally identifying data.
///
/// Without a compiled denylist every key is treated as sensitive.
pub fn is_sensitive_key(key: &str) -> bool {
    match denylist() {
        Some(re) => re.is_match(key),
        None => true,
    }
}

/// Whether a string value looks like a phone number.
pub fn looks_like_phone(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 20 {
        return false;
    }
    let allowed = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')' | '.'));
    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    allowed && digits >= 10
}

/// Filter a metadata value, returning the sanitized copy.
pub fn filter_metadata(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(filter_object(map)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !is_phone_value(v))
                .map(filter_metadata)
                .collect(),
        ),
        other => other,
    }
}

fn filter_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(key, value)| !is_sensitive_key(key) && !is_phone_value(value))
        .map(|(key, value)| (key, filter_metadata(value)))
        .collect()
}

fn is_phone_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if looks_like_phone(s))
}

/// Normalize arbitrary caller metadata into a filtered JSON object.
pub(crate) fn sanitize(metadata: Value) -> Value {
    match filter_metadata(metadata) {
        Value::Object(map) => Value::Object(map),
        Value::Null => Value::Object(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}
