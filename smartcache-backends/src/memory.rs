//! In-memory LRU backend with per-entry TTL.
//!
//! Suitable for tests, development, and single-process deployments where
//! cached results need not be shared between processes.
//!
//! Counters written by `incr` live outside the LRU, so capacity pressure
//! never resets a dependency generation.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use smartcache_core::constants::DEFAULT_MAX_ENTRIES;
use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::traits::CacheBackend;
use smartcache_core::types::CacheKey;

const BACKEND_NAME: &str = "memory";

/// Stored bytes with TTL.
#[derive(Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl MemoryEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.ttl.map_or(false, |ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// Memory backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Whether to sweep expired entries before evicting live ones
    pub auto_cleanup: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            auto_cleanup: true,
        }
    }
}

/// In-memory cache backend.
///
/// Thread-safe. At capacity, expired entries are swept first; if the cache is
/// still full, the least recently used entry is evicted.
pub struct MemoryBackend {
    // Lock order: entries before counters.
    entries: Mutex<LruCache<String, MemoryEntry>>,
    counters: Mutex<HashMap<String, u64>>,
    config: MemoryConfig,
}

impl MemoryBackend {
    /// Creates a backend with default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Creates a backend holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::with_config(MemoryConfig {
            max_entries,
            ..Default::default()
        })
    }

    /// Creates a backend with custom configuration.
    pub fn with_config(config: MemoryConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            counters: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn insert_locked(&self, entries: &mut LruCache<String, MemoryEntry>, key: &str, entry: MemoryEntry) {
        let at_capacity = !entries.contains(key) && entries.len() >= entries.cap().get();

        if at_capacity && self.config.auto_cleanup {
            Self::cleanup_expired_locked(entries);
        }

        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                debug!(key = %evicted, "Evicted least recently used entry");
            }
        }
    }

    fn cleanup_expired_locked(entries: &mut LruCache<String, MemoryEntry>) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Removes all expired entries, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        Self::cleanup_expired_locked(&mut self.entries.lock())
    }

    /// Clears all entries and counters.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.counters.lock().clear();
    }

    /// Returns the number of stored entries (including expired ones not yet swept).
    ///
    /// Counters are not included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns backend statistics.
    pub fn stats(&self) -> MemoryStats {
        let entries = self.entries.lock();
        let expired = entries.iter().filter(|(_, e)| e.is_expired()).count();

        MemoryStats {
            total_entries: entries.len(),
            expired_entries: expired,
            valid_entries: entries.len().saturating_sub(expired),
            capacity: self.config.max_entries,
            counters: self.counters.lock().len(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_counter(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| SmartCacheError::backend(BACKEND_NAME, "value is not a counter"))
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key.as_str());
        }

        let counters = self.counters.lock();
        Ok(counters
            .get(key.as_str())
            .map(|count| count.to_string().into_bytes()))
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock();
        self.counters.lock().remove(key.as_str());
        self.insert_locked(&mut entries, key.as_str(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut entries = self.entries.lock();
        let removed_entry = entries.pop(key.as_str()).is_some();
        let removed_counter = self.counters.lock().remove(key.as_str()).is_some();
        Ok(removed_entry || removed_counter)
    }

    async fn incr(&self, key: &CacheKey) -> Result<u64> {
        let mut entries = self.entries.lock();
        let mut counters = self.counters.lock();

        // A value written with `set` becomes a counter on first increment.
        let seeded = match entries.peek(key.as_str()) {
            Some(entry) if !entry.is_expired() => Some(parse_counter(&entry.value)?),
            _ => None,
        };
        if let Some(current) = seeded {
            entries.pop(key.as_str());
            counters.insert(key.as_str().to_string(), current);
        }

        let count = counters.entry(key.as_str().to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    #[instrument(skip(self))]
    async fn purge(&self, prefix: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }

        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|k, _| !k.starts_with(prefix));

        debug!(
            removed = doomed.len(),
            counters_removed = before - counters.len(),
            "Purged memory backend"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Memory backend statistics.
#[derive(Clone, Debug)]
pub struct MemoryStats {
    /// Total entries (including expired)
    pub total_entries: usize,
    /// Expired entries
    pub expired_entries: usize,
    /// Valid (non-expired) entries
    pub valid_entries: usize,
    /// Maximum capacity
    pub capacity: usize,
    /// Counters held outside the LRU
    pub counters: usize,
}
