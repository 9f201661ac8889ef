//! Per-field expiry for values stored inside Redis hashes.
//!
//! Redis cannot expire individual hash fields, so each field holds a
//! container recording when it was written and for how long it is valid.
//! Expiry is only checked on read.

use chrono::{DateTime, Utc};
use kvcache_core::{format_timestamp, CacheError, CacheValue};
use serde::Serialize;

use crate::codec;

/// Field of the container holding the write time.
pub const SET_AT_FIELD: &str = "_redis_set_at";
const SET_AT_ALIAS: &str = "setAt";

/// Unit in which a container's `ttl` is interpreted on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashTtlUnit {
    /// `ttl` is in seconds, the same unit it was written in.
    #[default]
    Seconds,
    /// `ttl` is compared directly against elapsed milliseconds. Containers
    /// written by older deployments that relied on this keep their lifetime.
    Milliseconds,
}

impl HashTtlUnit {
    fn as_millis(self, ttl: f64) -> f64 {
        match self {
            HashTtlUnit::Seconds => ttl * 1000.0,
            HashTtlUnit::Milliseconds => ttl,
        }
    }
}

#[derive(Serialize)]
struct ValueContainer<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a CacheValue>,
    #[serde(rename = "_redis_set_at")]
    set_at: String,
}

/// Result of reading a hash field.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwrapped {
    Live(Option<CacheValue>),
    /// The field outlived its TTL and should be deleted.
    Expired,
}

/// Wrap a value into the payload stored in a hash field.
pub fn wrap(
    value: Option<&CacheValue>,
    ttl: Option<u64>,
    now: DateTime<Utc>,
) -> Result<String, CacheError> {
    let container = ValueContainer {
        ttl,
        value,
        set_at: format_timestamp(&now),
    };
    serde_json::to_string(&container)
        .map_err(|e| CacheError::Encode(format!("JSON serialize error: {e}")))
}

/// Decode a hash field payload and check its expiry against `now`.
pub fn unwrap(payload: &str, now: DateTime<Utc>, unit: HashTtlUnit) -> Unwrapped {
    let mut container = match codec::decode(payload) {
        CacheValue::Object(map) => map,
        CacheValue::Null => return Unwrapped::Live(Some(CacheValue::Null)),
        _ => {
            tracing::debug!("hash field does not hold a value container");
            return Unwrapped::Live(None);
        }
    };

    let set_at = container
        .get(SET_AT_FIELD)
        .or_else(|| container.get(SET_AT_ALIAS))
        .and_then(CacheValue::as_timestamp)
        .copied();
    let ttl = match container.get("ttl") {
        Some(CacheValue::Number(n)) => n.as_f64(),
        _ => None,
    };

    if let (Some(set_at), Some(ttl)) = (set_at, ttl) {
        if is_expired(set_at, ttl, now, unit) {
            return Unwrapped::Expired;
        }
    }

    Unwrapped::Live(container.remove("value"))
}

/// Whether a field written at `set_at` with `ttl` has expired at `now`.
pub fn is_expired(set_at: DateTime<Utc>, ttl: f64, now: DateTime<Utc>, unit: HashTtlUnit) -> bool {
    let elapsed = (now - set_at).num_milliseconds() as f64;
    elapsed > unit.as_millis(ttl)
}
