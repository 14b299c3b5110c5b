//! Event payload decoding and context construction.
//!
//! Resource attributes reach the provider as untyped JSON. This module
//! turns them into [`SelfDescribingJson`] values: an Iglu schema URI plus
//! a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::ProviderError;

/// Key holding the Iglu schema URI of an event or context entry.
pub const IGLU_URI_KEY: &str = "iglu_uri";

/// Key holding the payload of an event or context entry.
pub const PAYLOAD_KEY: &str = "payload";

/// A payload tagged with the Iglu schema that describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfDescribingJson {
    /// Iglu URI, e.g. `iglu:com.acme/event/jsonschema/1-0-0`.
    pub schema: String,
    /// The payload itself.
    pub data: Value,
}

impl SelfDescribingJson {
    /// Create a self-describing JSON from a schema and its data.
    pub fn new(schema: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            schema: schema.into(),
            data: data.into(),
        }
    }

    /// Render as a `{"schema": ..., "data": ...}` JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "schema": self.schema,
            "data": self.data,
        })
    }
}

/// Parse a JSON string into an object.
///
/// Numbers keep their exact textual value, so timestamps and large
/// integers survive without float rounding.
pub fn string_to_map(input: &str) -> Result<Map<String, Value>, ProviderError> {
    match serde_json::from_str::<Value>(input)? {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::InvalidPayload(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
    }
}

/// Re-type the string values of a flat map.
///
/// Each string is tried as an integer, then a finite float, then a
/// boolean, and is kept as a string otherwise. Non-string values are
/// passed through unchanged.
pub fn coerce_string_map(input: &Map<String, Value>) -> Map<String, Value> {
    input
        .iter()
        .map(|(key, value)| {
            let coerced = match value {
                Value::String(s) => coerce_string(s),
                other => other.clone(),
            };
            (key.clone(), coerced)
        })
        .collect()
}

fn coerce_string(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    // Integers beyond i64 keep their exact digits.
    if is_integer_literal(s) {
        if let Ok(n) = s.parse::<Number>() {
            return Value::Number(n);
        }
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    if let Ok(b) = s.parse::<bool>() {
        return Value::Bool(b);
    }
    Value::String(s.to_string())
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Decode an event or context payload attribute.
///
/// A string is parsed as JSON; an object is treated as a flat attribute
/// map and coerced with [`coerce_string_map`].
pub fn payload_from_value(value: &Value) -> Result<Map<String, Value>, ProviderError> {
    match value {
        Value::String(s) => string_to_map(s),
        Value::Object(map) => Ok(coerce_string_map(map)),
        other => Err(ProviderError::InvalidPayload(format!(
            "expected a JSON string or an object, got {}",
            kind(other)
        ))),
    }
}

/// Convert one `{iglu_uri, payload}` entry into a [`SelfDescribingJson`].
pub fn self_describing_json_from_map(
    attr: &Map<String, Value>,
) -> Result<SelfDescribingJson, ProviderError> {
    let iglu_uri = attr
        .get(IGLU_URI_KEY)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ProviderError::MissingField(IGLU_URI_KEY.to_string()))?;
    let payload = attr
        .get(PAYLOAD_KEY)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ProviderError::MissingField(PAYLOAD_KEY.to_string()))?;

    let schema = iglu_uri.as_str().ok_or_else(|| {
        ProviderError::Validation(format!("'{}' must be a string", IGLU_URI_KEY))
    })?;
    let data = payload_from_value(payload)?;

    Ok(SelfDescribingJson::new(schema, data))
}

/// Convert a list of context entries.
///
/// Entries that are not objects are skipped. The first bad entry fails
/// the whole list.
pub fn contexts_from_list(entries: &[Value]) -> Result<Vec<SelfDescribingJson>, ProviderError> {
    entries
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            self_describing_json_from_map(entry).map_err(|e| match e {
                ProviderError::MissingField(field) => ProviderError::InvalidContext(field),
                other => other,
            })
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
