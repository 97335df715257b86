//! The SmartCache client.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use smartcache_backends::MemoryBackend;
use smartcache_core::error::Result;
use smartcache_core::settings::Settings;
use smartcache_core::traits::CacheBackend;
use smartcache_core::types::{CacheKey, CacheStats, CachedEntry};
use smartcache_keys::key_prefix_pattern;

use crate::memoize::MemoizeBuilder;
use crate::stats::StatsRecorder;

struct Inner {
    backend: Arc<dyn CacheBackend>,
    settings: Settings,
    stats: StatsRecorder,
}

/// Handle to a cache backend plus the settings memoized functions run with.
///
/// Cloning is cheap; clones share the backend connection and statistics.
#[derive(Clone)]
pub struct SmartCache {
    inner: Arc<Inner>,
}

impl SmartCache {
    /// Connects to the backend selected by `settings`.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let backend = smartcache_backends::connect(&settings).await?;
        Ok(Self::with_backend(backend, settings))
    }

    /// Connects using `SMARTCACHE_*` environment variables.
    pub async fn from_env() -> Result<Self> {
        Self::connect(Settings::from_env()?).await
    }

    /// Wraps an existing backend.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, settings: Settings) -> Self {
        info!(
            backend = backend.name(),
            prefix = %settings.key_prefix,
            default_timeout = ?settings.default_timeout_seconds,
            fail_open = settings.fail_open,
            "SmartCache initialized"
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                stats: StatsRecorder::new(),
            }),
        }
    }

    /// Creates a client over a fresh in-memory backend with default settings.
    pub fn in_memory() -> Self {
        let settings = Settings::default();
        let backend = Arc::new(MemoryBackend::with_capacity(settings.max_entries));
        Self::with_backend(backend, settings)
    }

    /// Returns the active settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns the storage backend.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.inner.backend
    }

    /// Starts memoizing the function registered under `name`.
    ///
    /// The name is part of every key, so it must be unique per function and
    /// stable across releases that should share cached results.
    pub fn memoize(&self, name: impl Into<String>) -> MemoizeBuilder {
        MemoizeBuilder::new(self.clone(), name.into())
    }

    /// Removes every entry and dependency counter under the key prefix.
    #[instrument(skip(self), fields(backend = self.inner.backend.name()))]
    pub async fn purge(&self) -> Result<()> {
        let pattern = key_prefix_pattern(&self.inner.settings.key_prefix);
        self.inner.backend.purge(&pattern).await?;
        info!(prefix = %self.inner.settings.key_prefix, "Cache purged");
        Ok(())
    }

    /// Checks that the backend is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.inner.backend.ping().await
    }

    /// Fetches and decodes the entry stored under a raw key.
    pub async fn get_entry(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
        match self.inner.backend.get(key).await? {
            Some(raw) => Ok(Some(CachedEntry::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Deletes a raw key.
    pub async fn delete_key(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.inner.backend.delete(key).await?;
        if removed {
            self.inner.stats.record_invalidation();
        }
        Ok(removed)
    }

    /// Returns a snapshot of hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Zeroes the hit/miss counters.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub(crate) fn recorder(&self) -> &StatsRecorder {
        &self.inner.stats
    }

    /// Applies fail-open handling to a backend result.
    ///
    /// Returns `Ok(None)` when a backend failure was absorbed.
    pub(crate) fn absorb<T>(&self, operation: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.inner.settings.fail_open && e.is_backend_error() => {
                warn!(
                    backend = self.inner.backend.name(),
                    operation,
                    error = %e,
                    "Cache backend failed; calling through"
                );
                self.inner.stats.record_backend_error();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Logs a lookup outcome at info when verbose, debug otherwise.
    pub(crate) fn trace_lookup(&self, outcome: &'static str, function: &str, key: &CacheKey) {
        if self.inner.settings.verbose {
            info!(outcome, function, key = %key, "Cache lookup");
        } else {
            debug!(outcome, function, key = %key, "Cache lookup");
        }
    }
}

impl std::fmt::Debug for SmartCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCache")
            .field("backend", &self.inner.backend.name())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_connect_memory() {
        let cache = SmartCache::connect(Settings::default()).await.unwrap();
        assert_eq!(cache.backend().name(), "memory");
        assert_ok!(cache.ping().await);
    }

    #[tokio::test]
    async fn test_purge_keeps_foreign_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SmartCache::with_backend(backend.clone(), Settings::default().with_prefix("app"));

        let mine = CacheKey::new("app:call:1").unwrap();
        let similar = CacheKey::new("application:call:1").unwrap();
        backend.set(&mine, b"1".to_vec(), None).await.unwrap();
        backend.set(&similar, b"2".to_vec(), None).await.unwrap();

        cache.purge().await.unwrap();

        assert!(backend.get(&mine).await.unwrap().is_none());
        assert!(backend.get(&similar).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_entry_and_delete_key() {
        let cache = SmartCache::in_memory();
        let key = CacheKey::new("smartcache:call:abc").unwrap();
        let entry = CachedEntry::new(&"hello", Some(Duration::from_secs(60)), Default::default()).unwrap();
        cache.backend().set(&key, entry.encode().unwrap(), None).await.unwrap();

        let fetched = cache.get_entry(&key).await.unwrap().unwrap();
        assert_eq!(fetched.value_as::<String>().unwrap(), "hello");

        assert!(cache.delete_key(&key).await.unwrap());
        assert!(cache.get_entry(&key).await.unwrap().is_none());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_get_entry_rejects_foreign_bytes() {
        let cache = SmartCache::in_memory();
        let key = CacheKey::new("smartcache:raw").unwrap();
        cache.backend().set(&key, b"not json".to_vec(), None).await.unwrap();

        assert!(cache.get_entry(&key).await.is_err());
    }
}
