//! Redis backend.
//!
//! Uses the `redis` crate's [`ConnectionManager`], which multiplexes commands
//! over one connection and reconnects transparently after failures.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info, instrument};

use smartcache_core::constants::REDIS_SCAN_BATCH;
use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::traits::CacheBackend;
use smartcache_core::types::CacheKey;

const BACKEND_NAME: &str = "redis";

/// Redis cache backend.
pub struct RedisBackend {
    manager: ConnectionManager,
    url: String,
}

impl RedisBackend {
    /// Connects to `url` (`redis://[:password@]host[:port][/db]`).
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;

        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                SmartCacheError::ConnectionTimeout(format!(
                    "redis at {} after {:?}",
                    redact_url(url),
                    connect_timeout
                ))
            })?
            .map_err(|e| SmartCacheError::BackendUnavailable(format!("redis at {}: {}", redact_url(url), e)))?;

        info!(url = %redact_url(url), "Connected to redis");
        Ok(Self {
            manager,
            url: url.to_string(),
        })
    }

    /// Returns the connection URL with credentials masked.
    pub fn url(&self) -> String {
        redact_url(&self.url)
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_redis_error(e: RedisError) -> SmartCacheError {
    if e.is_timeout() {
        SmartCacheError::ConnectionTimeout(format!("redis: {e}"))
    } else if e.is_connection_dropped() || e.is_connection_refusal() {
        SmartCacheError::BackendUnavailable(format!("redis: {e}"))
    } else {
        SmartCacheError::backend(BACKEND_NAME, e)
    }
}

/// Masks the password in a redis URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Escapes glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection();
        conn.get(key.as_str()).await.map_err(map_redis_error)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection();
        match ttl {
            Some(ttl) if !ttl.is_zero() => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex::<_, _, ()>(key.as_str(), value, millis)
                    .await
                    .map_err(map_redis_error)
            }
            _ => conn
                .set::<_, _, ()>(key.as_str(), value)
                .await
                .map_err(map_redis_error),
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.connection();
        let removed: i64 = conn.del(key.as_str()).await.map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &CacheKey) -> Result<u64> {
        let mut conn = self.connection();
        conn.incr(key.as_str(), 1u64).await.map_err(map_redis_error)
    }

    #[instrument(skip(self))]
    async fn purge(&self, prefix: &str) -> Result<()> {
        let mut conn = self.connection();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: usize = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(REDIS_SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            if !keys.is_empty() {
                removed += keys.len();
                let _: i64 = conn.del(keys).await.map_err(map_redis_error)?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(removed, "Purged redis keys");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(SmartCacheError::ProtocolError(format!("unexpected PING reply: {pong}")))
        }
    }
}
