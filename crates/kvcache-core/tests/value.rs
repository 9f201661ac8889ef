use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use kvcache_core::{format_timestamp, CacheError, CacheValue, KeyTtl, SetOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

#[test]
fn from_json_is_structural() {
    let value = CacheValue::from(json!({"a": [1, "two", null], "b": true}));

    let a = value.get("a").and_then(CacheValue::as_array).unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(a[1], CacheValue::from("two"));
    assert!(a[2].is_null());
    assert_eq!(value.get("b"), Some(&CacheValue::Bool(true)));
}

#[test]
fn from_json_does_not_detect_dates() {
    let value = CacheValue::from(json!("2024-03-01T10:00:00.000Z"));
    assert_eq!(value.as_str(), Some("2024-03-01T10:00:00.000Z"));
}

#[test]
fn non_finite_float_becomes_null() {
    assert!(CacheValue::from(f64::NAN).is_null());
    assert!(CacheValue::from(f64::INFINITY).is_null());
    assert_eq!(CacheValue::from(1.5), CacheValue::from(json!(1.5)));
}

#[test]
fn to_json_renders_timestamps_as_iso_strings() {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    let mut map = BTreeMap::new();
    map.insert("at".to_string(), CacheValue::from(ts));

    assert_eq!(
        CacheValue::Object(map).to_json(),
        json!({"at": "2024-03-01T10:00:00.000Z"})
    );
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

#[test]
fn timestamp_serializes_with_millis_and_trailing_z() {
    let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    let text = serde_json::to_string(&CacheValue::Timestamp(ts)).unwrap();

    assert_eq!(text, "\"2023-11-14T22:13:20.123Z\"");
    let inner = text.trim_matches('"');
    assert!(inner.len() >= 20);
    assert!(inner.ends_with('Z'));
}

#[test]
fn timestamps_keep_millisecond_precision() {
    let precise = chrono::DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);

    let value = CacheValue::from(precise);
    assert_eq!(
        value.as_timestamp().map(|ts| ts.timestamp_subsec_nanos()),
        Some(123_000_000)
    );
    assert_eq!(value, CacheValue::timestamp(precise));

    // Sub-millisecond differences are not observable once stored.
    let raw = CacheValue::Timestamp(precise);
    let stored = CacheValue::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap());
    assert_eq!(raw, stored);
    assert_ne!(
        raw,
        CacheValue::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_124).unwrap())
    );
    assert_ne!(raw, CacheValue::from("2023-11-14T22:13:20.123Z"));
}

#[test]
fn object_serializes_like_json() {
    let value = CacheValue::from(json!({"name": "ada", "tags": ["x"], "n": 3}));
    let text = serde_json::to_string(&value).unwrap();
    let back: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(back, json!({"name": "ada", "tags": ["x"], "n": 3}));
}

#[test]
fn format_timestamp_matches_serialization() {
    let ts = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
    assert_eq!(format_timestamp(&ts), "1999-12-31T23:59:59.000Z");
}

// ---------------------------------------------------------------------------
// Typed access
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
    last_seen: chrono::DateTime<Utc>,
}

#[test]
fn typed_round_trip_through_cache_value() {
    let profile = Profile {
        name: "ada".to_string(),
        visits: 7,
        last_seen: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
    };

    let value = CacheValue::from_serialize(&profile).unwrap();
    let back: Profile = value.deserialize_into().unwrap();
    assert_eq!(back, profile);
}

#[test]
fn deserialize_into_wrong_shape_is_decode_error() {
    let value = CacheValue::from("not a profile");
    let err = value.deserialize_into::<Profile>().unwrap_err();
    assert!(matches!(err, CacheError::Decode(_)));
}

// ---------------------------------------------------------------------------
// Errors and options
// ---------------------------------------------------------------------------

#[test]
fn not_cacheable_names_the_value() {
    assert_eq!(
        CacheError::not_cacheable(None).to_string(),
        "value cannot be undefined"
    );
    assert_eq!(
        CacheError::not_cacheable(Some(&CacheValue::Null)).to_string(),
        "value cannot be null"
    );
}

#[test]
fn key_ttl_from_raw_reply() {
    assert_eq!(KeyTtl::from_seconds(-2), KeyTtl::Missing);
    assert_eq!(KeyTtl::from_seconds(-1), KeyTtl::Persistent);
    assert_eq!(
        KeyTtl::from_seconds(30).remaining(),
        Some(Duration::from_secs(30))
    );
    assert_eq!(KeyTtl::Persistent.remaining(), None);
}

#[test]
fn set_options_default_has_no_ttl() {
    assert_eq!(SetOptions::default().ttl, None);
    assert_eq!(SetOptions::with_ttl(0).ttl, Some(0));
}
