use async_trait::async_trait;
use chrono::Utc;
use kvcache_core::{CacheError, CacheStore, CacheValue, DelOptions, KeyTtl, SetOptions};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::codec;
use crate::config::RedisStoreConfig;
use crate::hash_ttl::{self, Unwrapped};
use crate::pool::{ConnectionPool, PooledConnection, RedisPool, StoreConnection};

const EVENT_CAPACITY: usize = 64;

/// Events broadcast to subscribers of a [`RedisStore`], independently of the
/// operation that triggered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The pool failed to hand out a connection, or a connection broke
    /// (reset, I/O failure) while an operation was using it.
    RedisError { message: String },
}

/// Redis-backed implementation of the [`CacheStore`] trait.
///
/// Values are JSON-encoded. When a `hash_from_key` function is configured
/// and returns a hash name for a key, the value is stored as a field of that
/// hash instead, wrapped with its write time and TTL (see [`hash_ttl`]).
///
/// Each operation borrows one connection from the pool and returns it before
/// the operation's future resolves, whatever the outcome.
pub struct RedisStore<P: ConnectionPool = RedisPool> {
    pool: P,
    config: RedisStoreConfig,
    events: broadcast::Sender<StoreEvent>,
}

impl RedisStore<RedisPool> {
    /// Create a store with its own [`RedisPool`]. Must be called inside a
    /// Tokio runtime; no connection is opened until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting connection URL is invalid.
    pub fn new(config: RedisStoreConfig) -> Result<Self, CacheError> {
        let config = config.resolve_url();
        let pool = RedisPool::new(&config.connection_url(), config.pool_size)?;
        Ok(Self::with_pool(pool, config))
    }

    /// Create a store from a Redis URL with default options.
    pub fn from_url(url: &str) -> Result<Self, CacheError> {
        Self::new(RedisStoreConfig::default().with_url(url))
    }
}

impl<P: ConnectionPool> RedisStore<P> {
    /// Create a store over an existing pool. The store owns the pool from now on.
    pub fn with_pool(pool: P, config: RedisStoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pool,
            config: config.resolve_url(),
            events,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Subscribe to pool-level errors: failed acquisitions and connections
    /// that broke during an operation.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Borrow a raw connection for commands outside the [`CacheStore`]
    /// contract. The configured database is already selected; the connection
    /// goes back to the pool when the guard is dropped or released. A
    /// [`RedisPool`] connection used through [`RedisConnection::inner`](crate::RedisConnection::inner)
    /// is closed on release instead of being reused.
    pub async fn client(&self) -> Result<PooledConnection<'_, P>, CacheError> {
        self.connect().await
    }

    /// Delete one field from a hash.
    pub async fn hdel(&self, hash: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connect().await?;
        tracing::debug!(hash, key, "hdel");
        conn.hdel(hash, key).await?;
        Ok(())
    }

    /// Delete a whole hash, regardless of routing.
    pub async fn hreset(&self, hash: &str) -> Result<(), CacheError> {
        self.del(hash, DelOptions::skip_hash_from_key()).await
    }

    /// Look up a value and deserialize it into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(value) => value.deserialize_into().map(Some),
            None => Ok(None),
        }
    }

    async fn connect(&self) -> Result<PooledConnection<'_, P>, CacheError> {
        let conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "failed to acquire Redis connection");
                let _ = self.events.send(StoreEvent::RedisError {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut conn = PooledConnection::new(&self.pool, conn).with_events(&self.events);
        if let Some(db) = self.config.db {
            conn.select(db).await?;
        }
        Ok(conn)
    }

    /// The hash a key is routed to, if any.
    fn hash_for(&self, key: &str) -> Option<String> {
        let hash_from_key = self.config.hash_from_key.as_ref()?;
        hash_from_key(key).filter(|hash| !hash.is_empty())
    }

    fn is_cacheable(&self, value: Option<&CacheValue>) -> bool {
        match &self.config.is_cacheable_value {
            Some(predicate) => predicate(value),
            None => value.is_some(),
        }
    }
}

#[async_trait]
impl<P: ConnectionPool> CacheStore for RedisStore<P> {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        let mut conn = self.connect().await?;

        let Some(hash) = self.hash_for(key) else {
            tracing::debug!(key, "get");
            let raw = conn.get(key).await?;
            return Ok(raw.map(|payload| codec::decode(&payload)));
        };

        tracing::debug!(hash = %hash, key, "hget");
        let Some(payload) = conn.hget(&hash, key).await? else {
            return Ok(None);
        };

        match hash_ttl::unwrap(&payload, Utc::now(), self.config.hash_ttl_unit) {
            Unwrapped::Live(value) => Ok(value),
            Unwrapped::Expired => {
                tracing::debug!(hash = %hash, key, "hash field expired");
                if let Err(e) = conn.hdel(&hash, key).await {
                    tracing::warn!(hash = %hash, key, error = %e, "failed to delete expired hash field");
                }
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Option<CacheValue>,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        if !self.is_cacheable(value.as_ref()) {
            return Err(CacheError::not_cacheable(value.as_ref()));
        }

        let ttl = options.ttl.or(self.config.ttl);
        let mut conn = self.connect().await?;

        if let Some(hash) = self.hash_for(key) {
            tracing::debug!(hash = %hash, key, ?ttl, "hset");
            let payload = hash_ttl::wrap(value.as_ref(), ttl, Utc::now())?;
            return conn.hset(&hash, key, &payload).await;
        }

        let payload = codec::encode(value.as_ref())?;
        match ttl {
            Some(seconds) if seconds > 0 => {
                tracing::debug!(key, ttl = seconds, "setex");
                conn.set_ex(key, &payload, seconds).await
            }
            _ => {
                tracing::debug!(key, "set");
                conn.set(key, &payload).await
            }
        }
    }

    async fn del(&self, key: &str, options: DelOptions) -> Result<(), CacheError> {
        if !options.skip_hash_from_key {
            if let Some(hash) = self.hash_for(key) {
                return self.hdel(&hash, key).await;
            }
        }

        let mut conn = self.connect().await?;
        tracing::debug!(key, "del");
        conn.del(key).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), CacheError> {
        let mut conn = self.connect().await?;
        tracing::debug!(db = ?self.config.db, "flushdb");
        conn.flushdb().await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let mut conn = self.connect().await?;
        let raw = conn.ttl(key).await?;
        Ok(KeyTtl::from_seconds(raw))
    }

    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connect().await?;
        conn.keys(pattern.unwrap_or("*")).await
    }
}
