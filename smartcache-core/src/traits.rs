//! Common traits for SmartCache.
//!
//! These traits define the seams between the memoization layer and the
//! storage it runs on, enabling pluggable backends and testing.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::CacheKey;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Interface for cache storage.
///
/// Implementations might use:
/// - In-process memory (for testing/single-process deployments)
/// - Redis
/// - Memcached
///
/// Values are opaque bytes; the memoization layer owns the entry format.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Fetches the bytes stored under `key`.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Stores bytes under `key`. `None` keeps the value until evicted.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Returns true if a value was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Atomically increments the decimal counter under `key`.
    ///
    /// A missing counter counts as zero, so the first call returns 1.
    async fn incr(&self, key: &CacheKey) -> Result<u64>;

    /// Removes every key starting with `prefix`.
    ///
    /// Backends that cannot enumerate keys flush everything they hold.
    async fn purge(&self, prefix: &str) -> Result<()>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTITY TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable identity for values used as memoized-call arguments.
///
/// Implement this for types whose full serialized form is unsuitable as key
/// material (large, volatile, or not serializable at all), then pass them
/// wrapped in [`Identity`](crate::types::Identity).
pub trait CacheIdentity {
    /// Names the kind of value, so identities of different types never collide.
    ///
    /// This is key material. It must be a fixed string shared by every process
    /// and build that reads the same cache, so keep it stable across releases
    /// and refactors (for example `"billing::Account"`).
    fn cache_kind(&self) -> &'static str;

    /// Returns a string that is equal for values that should share cache entries.
    fn cache_identity(&self) -> String;
}

impl<T: CacheIdentity + ?Sized> CacheIdentity for &T {
    fn cache_kind(&self) -> &'static str {
        (**self).cache_kind()
    }

    fn cache_identity(&self) -> String {
        (**self).cache_identity()
    }
}

impl<T: CacheIdentity + ?Sized> CacheIdentity for std::sync::Arc<T> {
    fn cache_kind(&self) -> &'static str {
        (**self).cache_kind()
    }

    fn cache_identity(&self) -> String {
        (**self).cache_identity()
    }
}
