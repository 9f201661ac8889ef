use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use kvcache_core::CacheError;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, RedisResult};
use tokio::sync::broadcast;

use crate::store::StoreEvent;

/// Default maximum number of connections handed out by a [`RedisPool`].
pub const DEFAULT_POOL_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The key-value commands the store issues on a pooled connection.
#[async_trait]
pub trait StoreConnection: Send {
    async fn select(&mut self, db: i64) -> Result<(), CacheError>;
    async fn get(&mut self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&mut self, key: &str, value: &str) -> Result<(), CacheError>;
    async fn set_ex(&mut self, key: &str, value: &str, seconds: u64) -> Result<(), CacheError>;
    /// Returns the number of keys removed.
    async fn del(&mut self, key: &str) -> Result<i64, CacheError>;
    async fn hget(&mut self, hash: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hset(&mut self, hash: &str, field: &str, value: &str) -> Result<(), CacheError>;
    /// Returns the number of fields removed.
    async fn hdel(&mut self, hash: &str, field: &str) -> Result<i64, CacheError>;
    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, CacheError>;
    /// Raw `TTL` reply: -2 missing, -1 no expiry, otherwise seconds.
    async fn ttl(&mut self, key: &str) -> Result<i64, CacheError>;
    async fn flushdb(&mut self) -> Result<(), CacheError>;

    /// Why this connection can no longer be used, if a command broke it
    /// (connection reset, I/O failure).
    fn broken(&self) -> Option<&str> {
        None
    }
}

/// A pool of store connections.
///
/// Every connection obtained from [`acquire`](ConnectionPool::acquire) must be
/// handed back through [`release`](ConnectionPool::release) exactly once;
/// [`PooledConnection`] does this on drop.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    type Connection: StoreConnection;

    async fn acquire(&self) -> Result<Self::Connection, CacheError>;

    fn release(&self, conn: Self::Connection);
}

// ---------------------------------------------------------------------------
// PooledConnection guard
// ---------------------------------------------------------------------------

/// A connection on loan from a pool. Returned to the pool when dropped.
///
/// When the connection broke while on loan, the failure is broadcast as a
/// [`StoreEvent::RedisError`] to the attached channel on release.
pub struct PooledConnection<'a, P: ConnectionPool> {
    pool: &'a P,
    conn: Option<P::Connection>,
    events: Option<&'a broadcast::Sender<StoreEvent>>,
}

impl<'a, P: ConnectionPool> PooledConnection<'a, P> {
    pub fn new(pool: &'a P, conn: P::Connection) -> Self {
        Self {
            pool,
            conn: Some(conn),
            events: None,
        }
    }

    /// Report a broken connection on `events` when it is released.
    pub fn with_events(mut self, events: &'a broadcast::Sender<StoreEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Return the connection to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl<P: ConnectionPool> Deref for PooledConnection<'_, P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<P: ConnectionPool> DerefMut for PooledConnection<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<P: ConnectionPool> Drop for PooledConnection<'_, P> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let (Some(events), Some(reason)) = (self.events, conn.broken()) {
            tracing::error!(error = %reason, "Redis connection broken");
            let _ = events.send(StoreEvent::RedisError {
                message: reason.to_string(),
            });
        }
        self.pool.release(conn);
    }
}

// ---------------------------------------------------------------------------
// Redis-backed pool
// ---------------------------------------------------------------------------

/// A multiplexed Redis connection as held by the pool.
pub struct ManagedConnection {
    conn: MultiplexedConnection,
    discard: bool,
}

/// [`bb8`] manager opening multiplexed connections from a [`redis::Client`].
///
/// Connections are checked with `PING` when taken from the pool. A
/// connection flagged for discard is closed when it comes back instead of
/// being kept idle.
pub struct RedisConnectionManager {
    client: redis::Client,
}

impl RedisConnectionManager {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

impl bb8::ManageConnection for RedisConnectionManager {
    type Connection = ManagedConnection;
    type Error = RedisError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(ManagedConnection {
            conn,
            discard: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let _: () = redis::cmd("PING").query_async(&mut conn.conn).await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.discard
    }
}

/// A bounded pool of multiplexed Redis connections, backed by [`bb8`].
///
/// At most `max_size` connections are on loan at once; further acquisitions
/// wait. Must be created inside a Tokio runtime, which runs the pool's idle
/// connection reaper.
pub struct RedisPool {
    inner: bb8::Pool<RedisConnectionManager>,
}

impl RedisPool {
    /// Create a pool for a Redis URL. No connection is opened until first use.
    pub fn new(url: &str, max_size: usize) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {e}")))?;
        Ok(Self::from_client(client, max_size))
    }

    pub fn from_client(client: redis::Client, max_size: usize) -> Self {
        let max_size = u32::try_from(max_size.max(1)).unwrap_or(u32::MAX);
        let inner = bb8::Pool::builder()
            .max_size(max_size)
            .build_unchecked(RedisConnectionManager::new(client));
        Self { inner }
    }

    /// Number of idle connections ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.state().idle_connections as usize
    }
}

#[async_trait]
impl ConnectionPool for RedisPool {
    type Connection = RedisConnection;

    async fn acquire(&self) -> Result<RedisConnection, CacheError> {
        let conn = self
            .inner
            .get_owned()
            .await
            .map_err(|e| CacheError::Pool(format!("Redis connection error: {e}")))?;
        Ok(RedisConnection { conn, broken: None })
    }

    fn release(&self, conn: RedisConnection) {
        if let Some(reason) = &conn.broken {
            tracing::debug!(reason = %reason, "discarding broken Redis connection");
        }
        drop(conn);
    }
}

/// A connection on loan from a [`RedisPool`].
pub struct RedisConnection {
    conn: bb8::PooledConnection<'static, RedisConnectionManager>,
    broken: Option<String>,
}

impl RedisConnection {
    /// The underlying multiplexed connection, for commands outside [`StoreConnection`].
    ///
    /// Raw commands can change connection state (`SELECT`, `CLIENT`, ...), so
    /// a connection used this way is closed on release rather than reused.
    pub fn inner(&mut self) -> &mut MultiplexedConnection {
        self.conn.discard = true;
        &mut self.conn.conn
    }

    fn command_error(&mut self, command: &str, e: RedisError) -> CacheError {
        let message = format!("Redis {command} error: {e}");
        if e.is_io_error() || e.is_connection_dropped() {
            self.conn.discard = true;
            self.broken = Some(message.clone());
        }
        CacheError::Command(message)
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn select(&mut self, db: i64) -> Result<(), CacheError> {
        let result: RedisResult<()> = redis::cmd("SELECT").arg(db).query_async(&mut self.conn.conn).await;
        result.map_err(|e| self.command_error("SELECT", e))
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, CacheError> {
        let result: RedisResult<Option<String>> = self.conn.conn.get(key).await;
        result.map_err(|e| self.command_error("GET", e))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        let result: RedisResult<()> = self.conn.conn.set(key, value).await;
        result.map_err(|e| self.command_error("SET", e))
    }

    async fn set_ex(&mut self, key: &str, value: &str, seconds: u64) -> Result<(), CacheError> {
        let result: RedisResult<()> = self.conn.conn.set_ex(key, value, seconds).await;
        result.map_err(|e| self.command_error("SETEX", e))
    }

    async fn del(&mut self, key: &str) -> Result<i64, CacheError> {
        let result: RedisResult<i64> = self.conn.conn.del(key).await;
        result.map_err(|e| self.command_error("DEL", e))
    }

    async fn hget(&mut self, hash: &str, field: &str) -> Result<Option<String>, CacheError> {
        let result: RedisResult<Option<String>> = self.conn.conn.hget(hash, field).await;
        result.map_err(|e| self.command_error("HGET", e))
    }

    async fn hset(&mut self, hash: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let result: RedisResult<()> = self.conn.conn.hset(hash, field, value).await;
        result.map_err(|e| self.command_error("HSET", e))
    }

    async fn hdel(&mut self, hash: &str, field: &str) -> Result<i64, CacheError> {
        let result: RedisResult<i64> = self.conn.conn.hdel(hash, field).await;
        result.map_err(|e| self.command_error("HDEL", e))
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let result: RedisResult<Vec<String>> = self.conn.conn.keys(pattern).await;
        result.map_err(|e| self.command_error("KEYS", e))
    }

    async fn ttl(&mut self, key: &str) -> Result<i64, CacheError> {
        let result: RedisResult<i64> = self.conn.conn.ttl(key).await;
        result.map_err(|e| self.command_error("TTL", e))
    }

    async fn flushdb(&mut self) -> Result<(), CacheError> {
        let result: RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut self.conn.conn).await;
        result.map_err(|e| self.command_error("FLUSHDB", e))
    }

    fn broken(&self) -> Option<&str> {
        self.broken.as_deref()
    }
}
