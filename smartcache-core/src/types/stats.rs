//! Cache statistics snapshot.

use serde::{Deserialize, Serialize};

/// Counters describing how a cache client has been used.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls served from the cache
    pub hits: u64,
    /// Calls that had to compute the result
    pub misses: u64,
    /// Misses caused by an invalidated dependency
    pub stale: u64,
    /// Explicit refreshes
    pub refreshes: u64,
    /// Entries or dependencies explicitly invalidated
    pub invalidations: u64,
    /// Backend failures absorbed by fail-open handling
    pub backend_errors: u64,
}

impl CacheStats {
    /// Returns total lookups (hits + misses).
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Returns the hit rate in `[0.0, 1.0]`, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}
