use kvcache_redis::{
    CacheValue, HashTtlUnit, RedisStore, RedisStoreConfig, DEFAULT_HOST, DEFAULT_POOL_SIZE,
    DEFAULT_PORT,
};

// ---------------------------------------------------------------------------
// Defaults and builders (no Redis required)
// ---------------------------------------------------------------------------

#[test]
fn config_defaults() {
    let config = RedisStoreConfig::default();
    assert_eq!(config.host, DEFAULT_HOST);
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.db, None);
    assert_eq!(config.ttl, None);
    assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
    assert_eq!(config.hash_ttl_unit, HashTtlUnit::Seconds);
    assert!(config.hash_from_key.is_none());
    assert!(config.is_cacheable_value.is_none());
}

#[test]
fn builders_set_fields() {
    let config = RedisStoreConfig::new("cache.internal", 6380)
        .with_db(0)
        .with_ttl(120)
        .with_pool_size(4)
        .with_hash_ttl_unit(HashTtlUnit::Milliseconds)
        .with_hash_from_key(|key| Some(format!("h:{key}")))
        .with_cacheable_predicate(|value| value.is_some_and(|v| !v.is_null()));

    assert_eq!(config.host, "cache.internal");
    assert_eq!(config.port, 6380);
    assert_eq!(config.db, Some(0));
    assert_eq!(config.ttl, Some(120));
    assert_eq!(config.pool_size, 4);

    let route = config.hash_from_key.as_ref().unwrap();
    assert_eq!(route("k"), Some("h:k".to_string()));

    let cacheable = config.is_cacheable_value.as_ref().unwrap();
    assert!(cacheable(Some(&CacheValue::from(1_i64))));
    assert!(!cacheable(Some(&CacheValue::Null)));
    assert!(!cacheable(None));
}

#[test]
fn debug_redacts_password() {
    let config = RedisStoreConfig::default().with_password("hunter2");
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("***"));
}

// ---------------------------------------------------------------------------
// URL resolution
// ---------------------------------------------------------------------------

#[test]
fn url_overrides_connection_options() {
    let config = RedisStoreConfig::new("ignored", 1)
        .with_db(9)
        .with_ttl(5)
        .with_url("redis://:p%40ss@cache.internal:6380/2?ttl=30")
        .resolve_url();

    assert_eq!(config.host, "cache.internal");
    assert_eq!(config.port, 6380);
    assert_eq!(config.db, Some(2));
    assert_eq!(config.password.as_deref(), Some("p@ss"));
    assert_eq!(config.ttl, Some(30));
}

#[test]
fn url_without_port_or_db_uses_defaults() {
    let config = RedisStoreConfig::default()
        .with_db(4)
        .with_url("redis://cache.internal")
        .resolve_url();

    assert_eq!(config.host, "cache.internal");
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.db, None);
    assert_eq!(config.password, None);
}

#[test]
fn url_without_ttl_keeps_configured_ttl() {
    let config = RedisStoreConfig::default()
        .with_ttl(45)
        .with_url("redis://localhost:6379/0")
        .resolve_url();

    assert_eq!(config.ttl, Some(45));
    assert_eq!(config.db, Some(0));
}

#[test]
fn non_numeric_ttl_is_ignored() {
    let config = RedisStoreConfig::default()
        .with_url("redis://localhost/1?ttl=soon")
        .resolve_url();
    assert_eq!(config.ttl, None);
    assert_eq!(config.db, Some(1));
}

#[test]
fn unparsable_url_leaves_options_untouched() {
    let config = RedisStoreConfig::new("cache.internal", 6380)
        .with_db(3)
        .with_url("not a url")
        .resolve_url();

    assert_eq!(config.host, "cache.internal");
    assert_eq!(config.port, 6380);
    assert_eq!(config.db, Some(3));
}

#[test]
fn connection_url_encodes_password_and_omits_db() {
    let config = RedisStoreConfig::new("cache.internal", 6380)
        .with_db(2)
        .with_password("p@ss");
    assert_eq!(config.connection_url(), "redis://:p%40ss@cache.internal:6380/");

    let config = RedisStoreConfig::default();
    assert_eq!(config.connection_url(), "redis://127.0.0.1:6379/");
}

// ---------------------------------------------------------------------------
// Store construction does not connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn from_url_resolves_config() {
    let store = RedisStore::from_url("redis://127.0.0.1:6379/7?ttl=10").unwrap();
    assert_eq!(store.config().db, Some(7));
    assert_eq!(store.config().ttl, Some(10));
}

#[tokio::test]
async fn from_url_with_garbage_falls_back_to_defaults() {
    let store = RedisStore::from_url("not-a-valid-url").unwrap();
    assert_eq!(store.config().host, DEFAULT_HOST);
    assert_eq!(store.config().port, DEFAULT_PORT);
}
