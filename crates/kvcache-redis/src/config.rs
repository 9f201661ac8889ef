use std::fmt;
use std::sync::Arc;

use kvcache_core::CacheValue;
use url::Url;

use crate::hash_ttl::HashTtlUnit;
use crate::pool::DEFAULT_POOL_SIZE;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

/// Maps a cache key to the hash it should be stored in, if any.
/// Returning `None` or an empty name keeps the key at the top level.
pub type HashFromKey = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Decides whether a value may be written. `None` is the absent value.
pub type IsCacheableValue = Arc<dyn Fn(Option<&CacheValue>) -> bool + Send + Sync>;

/// Configuration for [`RedisStore`](crate::RedisStore).
#[derive(Clone)]
pub struct RedisStoreConfig {
    pub host: String,
    pub port: u16,
    /// Logical database selected on every acquired connection. `Some(0)` is
    /// selected explicitly; `None` leaves the connection's default.
    pub db: Option<i64>,
    pub password: Option<String>,
    /// Default TTL in seconds. `None` means entries never expire.
    pub ttl: Option<u64>,
    /// Connection string overriding host, port, db, password and ttl.
    pub url: Option<String>,
    pub pool_size: usize,
    pub hash_ttl_unit: HashTtlUnit,
    pub hash_from_key: Option<HashFromKey>,
    /// Replaces the default predicate, which rejects only the absent value.
    pub is_cacheable_value: Option<IsCacheableValue>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: None,
            password: None,
            ttl: None,
            url: None,
            pool_size: DEFAULT_POOL_SIZE,
            hash_ttl_unit: HashTtlUnit::default(),
            hash_from_key: None,
            is_cacheable_value: None,
        }
    }
}

impl fmt::Debug for RedisStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ttl", &self.ttl)
            .field("url", &self.url)
            .field("pool_size", &self.pool_size)
            .field("hash_ttl_unit", &self.hash_ttl_unit)
            .field("hash_from_key", &self.hash_from_key.is_some())
            .field("is_cacheable_value", &self.is_cacheable_value.is_some())
            .finish()
    }
}

impl RedisStoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_hash_ttl_unit(mut self, unit: HashTtlUnit) -> Self {
        self.hash_ttl_unit = unit;
        self
    }

    pub fn with_hash_from_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.hash_from_key = Some(Arc::new(f));
        self
    }

    pub fn with_cacheable_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&CacheValue>) -> bool + Send + Sync + 'static,
    {
        self.is_cacheable_value = Some(Arc::new(f));
        self
    }

    /// Apply `url` on top of the other options.
    ///
    /// Accepts `redis://[:password@]host[:port][/db][?ttl=N]`. Host, port, db
    /// and password are always taken from the URL, falling back to defaults
    /// when a part is missing; `ttl` is only replaced when the query has one.
    /// An unparsable URL leaves the options untouched.
    pub fn resolve_url(mut self) -> Self {
        let Some(raw) = self.url.clone() else {
            return self;
        };

        let url = match Url::parse(&raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparsable Redis URL");
                return self;
            }
        };

        self.host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        self.port = url.port().unwrap_or(DEFAULT_PORT);
        self.db = url.path().trim_start_matches('/').parse().ok();
        self.password = url.password().map(|p| {
            urlencoding::decode(p)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| p.to_string())
        });
        if let Some(ttl) = url
            .query_pairs()
            .find(|(k, _)| k == "ttl")
            .and_then(|(_, v)| v.parse().ok())
        {
            self.ttl = Some(ttl);
        }

        self
    }

    /// URL handed to the Redis client. The database is selected per
    /// connection, so it is not part of the URL.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/",
                urlencoding::encode(password),
                self.host,
                self.port
            ),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}
