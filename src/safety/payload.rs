//! Task payload sanitization.
//!
//! Payloads are caller-controlled JSON that we later echo into callback
//! envelopes. Two rules: a byte cap on the serialized form, and removal of
//! prototype-pollution key names at every depth so downstream JavaScript
//! consumers can merge the payload safely.

use serde_json::{Map, Value};

/// Key names dropped from objects at any depth.
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("payload invalid: {0}")]
    Invalid(String),
}

fn strip_forbidden(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
                .map(|(key, inner)| (key, strip_forbidden(inner)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(strip_forbidden).collect()),
        other => other,
    }
}

/// Sanitize a task payload: enforce the byte cap, drop dangerous keys.
/// Missing or null input yields an empty object.
pub fn sanitize(input: Option<&Value>, max_bytes: usize) -> Result<Value, PayloadError> {
    let value = match input {
        None | Some(Value::Null) => return Ok(Value::Object(Map::new())),
        Some(v) => v.clone(),
    };

    let serialized =
        serde_json::to_vec(&value).map_err(|e| PayloadError::Invalid(e.to_string()))?;
    if serialized.len() > max_bytes {
        return Err(PayloadError::TooLarge {
            size: serialized.len(),
            limit: max_bytes,
        });
    }

    Ok(strip_forbidden(value))
}
