//! kvcache: a cache store over Redis with value decoding and per-field hash expiry.
//!
//! This crate re-exports the kvcache sub-crates for single-import usage.
//!
//! ```rust,ignore
//! use kvcache::core::{CacheStore, CacheValue, SetOptions};
//! use kvcache::redis::{RedisStore, RedisStoreConfig};
//! ```

/// Core types: CacheValue, CacheStore, CacheError, SetOptions, DelOptions, KeyTtl.
pub use kvcache_core as core;

/// Redis store: RedisStore, RedisStoreConfig, RedisPool, MemoryPool, codec, hash_ttl.
#[cfg(feature = "redis")]
pub use kvcache_redis as redis;

pub use kvcache_core::{CacheError, CacheStore, CacheValue, DelOptions, KeyTtl, SetOptions};
