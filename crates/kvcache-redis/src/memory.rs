use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kvcache_core::CacheError;
use regex::Regex;
use tokio::sync::Mutex;

use crate::pool::{ConnectionPool, StoreConnection};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Database {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Database {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.strings.retain(|_, entry| !entry.is_expired(now));
    }
}

#[derive(Default)]
struct Shared {
    databases: Mutex<HashMap<i64, Database>>,
    commands: std::sync::Mutex<Vec<String>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    fail_next_acquire: AtomicBool,
    fail_commands: AtomicBool,
    drop_connections: AtomicBool,
}

/// An in-process [`ConnectionPool`] speaking a subset of Redis semantics.
///
/// Counts acquisitions and releases and can inject failures, which makes it
/// useful for testing code built on [`RedisStore`](crate::RedisStore)
/// without a server. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryPool {
    shared: Arc<Shared>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful acquisitions so far.
    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Connections currently on loan.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    /// Make the next `acquire` fail.
    pub fn fail_next_acquire(&self) {
        self.shared.fail_next_acquire.store(true, Ordering::SeqCst);
    }

    /// Make every command fail until switched off again.
    pub fn fail_commands(&self, fail: bool) {
        self.shared.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Make every command fail as if the server reset the connection, until
    /// switched off again. Connections that see this report themselves broken.
    pub fn drop_connections(&self, dropped: bool) {
        self.shared.drop_connections.store(dropped, Ordering::SeqCst);
    }

    /// Names of the commands issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A connection outside the pool's accounting, for seeding or inspecting data.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            shared: self.shared.clone(),
            db: 0,
            broken: None,
        }
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, CacheError> {
        if self.shared.fail_next_acquire.swap(false, Ordering::SeqCst) {
            return Err(CacheError::Pool("connection refused".to_string()));
        }
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(self.connection())
    }

    fn release(&self, _conn: MemoryConnection) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connection to a [`MemoryPool`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    db: i64,
    broken: Option<String>,
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

impl MemoryConnection {
    fn record(&mut self, command: &str) -> Result<(), CacheError> {
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
        if let Some(reason) = &self.broken {
            return Err(CacheError::Command(reason.clone()));
        }
        if self.shared.drop_connections.load(Ordering::SeqCst) {
            let reason = format!("{command} failed: connection reset by peer");
            self.broken = Some(reason.clone());
            return Err(CacheError::Command(reason));
        }
        if self.shared.fail_commands.load(Ordering::SeqCst) {
            return Err(CacheError::Command(format!("{command} failed: injected failure")));
        }
        Ok(())
    }

    async fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> T) -> T {
        let mut databases = self.shared.databases.lock().await;
        let db = databases.entry(self.db).or_default();
        db.purge_expired();
        f(db)
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn select(&mut self, db: i64) -> Result<(), CacheError> {
        self.record("SELECT")?;
        self.db = db;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, CacheError> {
        self.record("GET")?;
        self.with_db(|db| {
            if db.hashes.contains_key(key) {
                return Err(CacheError::Command(WRONGTYPE.to_string()));
            }
            Ok(db.strings.get(key).map(|e| e.value.clone()))
        })
        .await
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        self.record("SET")?;
        self.with_db(|db| {
            db.hashes.remove(key);
            db.strings.insert(
                key.to_string(),
                StringEntry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        })
        .await;
        Ok(())
    }

    async fn set_ex(&mut self, key: &str, value: &str, seconds: u64) -> Result<(), CacheError> {
        self.record("SETEX")?;
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(seconds))
            .ok_or_else(|| CacheError::Command("invalid expire time in 'setex' command".to_string()))?;
        self.with_db(|db| {
            db.hashes.remove(key);
            db.strings.insert(
                key.to_string(),
                StringEntry {
                    value: value.to_string(),
                    expires_at: Some(expires_at),
                },
            );
        })
        .await;
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<i64, CacheError> {
        self.record("DEL")?;
        Ok(self
            .with_db(|db| {
                let removed = db.strings.remove(key).is_some() || db.hashes.remove(key).is_some();
                i64::from(removed)
            })
            .await)
    }

    async fn hget(&mut self, hash: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.record("HGET")?;
        self.with_db(|db| {
            if db.strings.contains_key(hash) {
                return Err(CacheError::Command(WRONGTYPE.to_string()));
            }
            Ok(db.hashes.get(hash).and_then(|h| h.get(field)).cloned())
        })
        .await
    }

    async fn hset(&mut self, hash: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.record("HSET")?;
        self.with_db(|db| {
            if db.strings.contains_key(hash) {
                return Err(CacheError::Command(WRONGTYPE.to_string()));
            }
            db.hashes
                .entry(hash.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
            Ok(())
        })
        .await
    }

    async fn hdel(&mut self, hash: &str, field: &str) -> Result<i64, CacheError> {
        self.record("HDEL")?;
        self.with_db(|db| {
            if db.strings.contains_key(hash) {
                return Err(CacheError::Command(WRONGTYPE.to_string()));
            }
            let Some(fields) = db.hashes.get_mut(hash) else {
                return Ok(0);
            };
            let removed = fields.remove(field).is_some();
            if fields.is_empty() {
                db.hashes.remove(hash);
            }
            Ok(i64::from(removed))
        })
        .await
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.record("KEYS")?;
        let matcher = glob_to_regex(pattern)?;
        let mut keys = self
            .with_db(|db| {
                db.strings
                    .keys()
                    .chain(db.hashes.keys())
                    .filter(|k| matcher.is_match(k))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&mut self, key: &str) -> Result<i64, CacheError> {
        self.record("TTL")?;
        Ok(self
            .with_db(|db| match db.strings.get(key) {
                Some(StringEntry {
                    expires_at: Some(at),
                    ..
                }) => at.saturating_duration_since(Instant::now()).as_secs() as i64,
                Some(_) => -1,
                None if db.hashes.contains_key(key) => -1,
                None => -2,
            })
            .await)
    }

    async fn flushdb(&mut self) -> Result<(), CacheError> {
        self.record("FLUSHDB")?;
        self.with_db(|db| *db = Database::default()).await;
        Ok(())
    }

    fn broken(&self) -> Option<&str> {
        self.broken.as_deref()
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut re = String::from("^");
    let mut in_class = false;
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' if !in_class => {
                in_class = true;
                re.push('[');
            }
            ']' if in_class => {
                in_class = false;
                re.push(']');
            }
            c if in_class => re.push(c),
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| CacheError::Command(format!("invalid KEYS pattern: {e}")))
}
