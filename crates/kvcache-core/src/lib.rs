use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CacheValue: the value model shared by every store
// ---------------------------------------------------------------------------

/// A cacheable value: any JSON-representable structure, plus timestamps.
///
/// There is no "absent" variant. APIs that accept a possibly-missing value
/// take `Option<CacheValue>`, and `None` is what stores refuse by default.
///
/// Timestamps are persisted with millisecond precision. [`CacheValue::timestamp`]
/// and `From<DateTime<Utc>>` truncate to that precision, and equality compares
/// timestamps at it, so a value read back equals the value written.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<CacheValue>),
    Object(BTreeMap<String, CacheValue>),
}

/// Format a timestamp the way it is persisted: ISO-8601, milliseconds, `Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl CacheValue {
    /// A timestamp truncated to millisecond precision.
    pub fn timestamp(ts: DateTime<Utc>) -> Self {
        CacheValue::Timestamp(ts.trunc_subsecs(3))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            CacheValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, CacheValue>> {
        match self {
            CacheValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CacheValue]> {
        match self {
            CacheValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field of an object value.
    pub fn get(&self, field: &str) -> Option<&CacheValue> {
        self.as_object().and_then(|map| map.get(field))
    }

    /// Convert into plain JSON. Timestamps become ISO-8601 strings.
    pub fn to_json(&self) -> Value {
        match self {
            CacheValue::Null => Value::Null,
            CacheValue::Bool(b) => Value::Bool(*b),
            CacheValue::Number(n) => Value::Number(n.clone()),
            CacheValue::String(s) => Value::String(s.clone()),
            CacheValue::Timestamp(ts) => Value::String(format_timestamp(ts)),
            CacheValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            CacheValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Build a value from anything serde can serialize.
    ///
    /// `chrono` timestamps serialize as strings; they only come back as
    /// [`CacheValue::Timestamp`] after a round trip through a store's decoder.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|e| CacheError::Encode(format!("JSON serialize error: {e}")))
    }

    /// Deserialize this value into a typed structure.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        serde_json::from_value(self.to_json())
            .map_err(|e| CacheError::Decode(format!("JSON deserialize error: {e}")))
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheValue::Null, CacheValue::Null) => true,
            (CacheValue::Bool(a), CacheValue::Bool(b)) => a == b,
            (CacheValue::Number(a), CacheValue::Number(b)) => a == b,
            (CacheValue::String(a), CacheValue::String(b)) => a == b,
            (CacheValue::Timestamp(a), CacheValue::Timestamp(b)) => {
                a.timestamp_millis() == b.timestamp_millis()
            }
            (CacheValue::Array(a), CacheValue::Array(b)) => a == b,
            (CacheValue::Object(a), CacheValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for CacheValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CacheValue::Null => serializer.serialize_unit(),
            CacheValue::Bool(b) => serializer.serialize_bool(*b),
            CacheValue::Number(n) => n.serialize(serializer),
            CacheValue::String(s) => serializer.serialize_str(s),
            CacheValue::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
            CacheValue::Array(items) => serializer.collect_seq(items),
            CacheValue::Object(map) => serializer.collect_map(map),
        }
    }
}

impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::String(s) => f.write_str(s),
            CacheValue::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CacheValue::Null,
            Value::Bool(b) => CacheValue::Bool(b),
            Value::Number(n) => CacheValue::Number(n),
            Value::String(s) => CacheValue::String(s),
            Value::Array(items) => CacheValue::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                CacheValue::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<DateTime<Utc>> for CacheValue {
    fn from(ts: DateTime<Utc>) -> Self {
        CacheValue::timestamp(ts)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::String(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::String(s)
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        CacheValue::Bool(b)
    }
}

impl From<i64> for CacheValue {
    fn from(n: i64) -> Self {
        CacheValue::Number(n.into())
    }
}

impl From<u64> for CacheValue {
    fn from(n: u64) -> Self {
        CacheValue::Number(n.into())
    }
}

impl From<f64> for CacheValue {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n)
            .map(CacheValue::Number)
            .unwrap_or(CacheValue::Null)
    }
}

impl From<Vec<CacheValue>> for CacheValue {
    fn from(items: Vec<CacheValue>) -> Self {
        CacheValue::Array(items)
    }
}

impl From<BTreeMap<String, CacheValue>> for CacheValue {
    fn from(map: BTreeMap<String, CacheValue>) -> Self {
        CacheValue::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type shared by every cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pool error: {0}")]
    Pool(String),
    #[error("value cannot be {0}")]
    NotCacheable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("command error: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
}

impl CacheError {
    /// Build the error for a value rejected by a cacheability predicate.
    pub fn not_cacheable(value: Option<&CacheValue>) -> Self {
        match value {
            Some(v) => CacheError::NotCacheable(v.to_string()),
            None => CacheError::NotCacheable("undefined".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-operation options
// ---------------------------------------------------------------------------

/// Options for [`CacheStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// TTL in seconds overriding the store default. `Some(0)` is an explicit override.
    pub ttl: Option<u64>,
}

impl SetOptions {
    pub fn with_ttl(ttl: u64) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Options for [`CacheStore::del`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelOptions {
    /// Delete the top-level key even when the store routes it into a hash.
    pub skip_hash_from_key: bool,
}

impl DelOptions {
    pub fn skip_hash_from_key() -> Self {
        Self {
            skip_hash_from_key: true,
        }
    }
}

/// Remaining native expiry of a top-level key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and has no expiry.
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    /// Interpret a raw `TTL` reply (-2 missing, -1 no expiry, otherwise seconds).
    pub fn from_seconds(raw: i64) -> Self {
        match raw {
            -1 => KeyTtl::Persistent,
            n if n < 0 => KeyTtl::Missing,
            n => KeyTtl::Expires(Duration::from_secs(n as u64)),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheStore trait
// ---------------------------------------------------------------------------

/// The contract a caching layer expects from a backing store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short identifier of the backend, e.g. `"redis"`.
    fn name(&self) -> &str;

    /// Look up a value. A missing or expired entry is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError>;

    /// Store a value. `None` is rejected unless the store's predicate allows it.
    async fn set(
        &self,
        key: &str,
        value: Option<CacheValue>,
        options: SetOptions,
    ) -> Result<(), CacheError>;

    /// Delete a value.
    async fn del(&self, key: &str, options: DelOptions) -> Result<(), CacheError>;

    /// Remove every entry.
    async fn reset(&self) -> Result<(), CacheError>;

    /// Remaining expiry of a top-level key.
    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError>;

    /// List keys matching a glob pattern; `None` matches everything.
    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, CacheError>;
}
