//! Value codec: turns [`CacheValue`]s into stored payloads and back.
//!
//! Encoding is plain JSON. Decoding is looser than JSON: strings that look
//! like timestamps become [`CacheValue::Timestamp`], and strings that hold
//! JSON text are parsed and decoded again, so values written by other
//! clients as doubly-encoded JSON come back structured.

use chrono::{DateTime, Utc};
use kvcache_core::{CacheError, CacheValue};
use serde_json::Value;

/// Payload written when there is no value to serialize.
///
/// It decodes to the string `"undefined"`, so it cannot be told apart from a
/// cached string with that content.
pub const UNDEFINED_PAYLOAD: &str = "\"undefined\"";

/// Minimum length, in UTF-16 code units, of a string considered for
/// timestamp parsing.
const TIMESTAMP_MIN_LEN: usize = 20;

/// Encode a value for storage.
pub fn encode(value: Option<&CacheValue>) -> Result<String, CacheError> {
    match value {
        Some(v) => serde_json::to_string(v)
            .map_err(|e| CacheError::Encode(format!("JSON serialize error: {e}"))),
        None => Ok(UNDEFINED_PAYLOAD.to_string()),
    }
}

/// Decode a stored payload.
pub fn decode(payload: &str) -> CacheValue {
    decode_string(payload.to_string())
}

/// Decode an already-parsed JSON document.
pub fn decode_json(value: Value) -> CacheValue {
    match value {
        Value::Null => CacheValue::Null,
        Value::Array(items) => CacheValue::Array(items.into_iter().map(decode_json).collect()),
        Value::Object(map) => {
            CacheValue::Object(map.into_iter().map(|(k, v)| (k, decode_json(v))).collect())
        }
        Value::String(s) => decode_string(s),
        Value::Bool(b) => CacheValue::Bool(b),
        Value::Number(n) => CacheValue::Number(n),
    }
}

/// Re-apply decoding to a value. Decoding an already decoded value is a no-op
/// for everything except strings that still hold JSON text.
pub fn decode_value(value: CacheValue) -> CacheValue {
    match value {
        CacheValue::Timestamp(_) => value,
        CacheValue::Array(items) => CacheValue::Array(items.into_iter().map(decode_value).collect()),
        CacheValue::Object(map) => {
            CacheValue::Object(map.into_iter().map(|(k, v)| (k, decode_value(v))).collect())
        }
        CacheValue::String(s) => decode_string(s),
        other => other,
    }
}

fn decode_string(s: String) -> CacheValue {
    if s == "null" {
        return CacheValue::Null;
    }

    // Timestamp-shaped strings never fall through to JSON parsing.
    if looks_like_timestamp(&s) {
        return match parse_timestamp(&s) {
            Some(ts) => CacheValue::timestamp(ts),
            None => CacheValue::String(s),
        };
    }

    match serde_json::from_str::<Value>(&s) {
        Ok(parsed) => decode_json(parsed),
        Err(_) => CacheValue::String(s),
    }
}

/// The cheap shape test applied before attempting a timestamp parse.
pub fn looks_like_timestamp(s: &str) -> bool {
    s.ends_with('Z') && s.encode_utf16().count() >= TIMESTAMP_MIN_LEN
}

/// Parse an ISO-8601 instant. The Unix epoch itself is treated as invalid.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
        .filter(|ts| ts.timestamp_millis() != 0)
}
