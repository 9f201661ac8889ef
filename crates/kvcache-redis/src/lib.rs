//! Redis integration for kvcache.
//!
//! [`RedisStore`] implements the [`CacheStore`](kvcache_core::CacheStore)
//! trait on top of a [`bb8`] connection pool. On top of plain `GET`/`SET` it adds:
//!
//! - a value [`codec`] that restores timestamps and nested JSON on read;
//! - per-field expiry for keys routed into Redis hashes ([`hash_ttl`]),
//!   enforced lazily on read.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use kvcache_redis::{CacheStore, CacheValue, RedisStore, RedisStoreConfig, SetOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Entries under "user:*" go into one hash per user, with a 1-hour default TTL.
//! let config = RedisStoreConfig::default()
//!     .with_url("redis://127.0.0.1:6379/2")
//!     .with_ttl(3600)
//!     .with_hash_from_key(|key| {
//!         key.strip_prefix("user:")
//!             .and_then(|rest| rest.split(':').next())
//!             .map(|id| format!("user:{id}"))
//!     });
//! let store = RedisStore::new(config)?;
//!
//! store
//!     .set("user:42:name", Some(CacheValue::from("ada")), SetOptions::default())
//!     .await?;
//! let name = store.get("user:42:name").await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod config;
pub mod hash_ttl;
mod memory;
mod pool;
mod store;

pub use config::{HashFromKey, IsCacheableValue, RedisStoreConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use hash_ttl::HashTtlUnit;
pub use memory::{MemoryConnection, MemoryPool};
pub use pool::{
    ConnectionPool, ManagedConnection, PooledConnection, RedisConnection,
    RedisConnectionManager, RedisPool, StoreConnection, DEFAULT_POOL_SIZE,
};
pub use store::{RedisStore, StoreEvent};

// Re-export core types for convenience.
pub use kvcache_core::{CacheError, CacheStore, CacheValue, DelOptions, KeyTtl, SetOptions};
