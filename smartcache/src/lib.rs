//! # SmartCache
//!
//! Automatic caching and caching invalidation for functions and methods.
//!
//! Results of async functions are stored in a shared backend (memory, Redis
//! or Memcached) under keys derived from the function name and its
//! arguments. Entries expire after a TTL, and declared dependencies let one
//! call invalidate every result computed from the same underlying data.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use smartcache::{CacheIdentity, Identity, Settings, SmartCache};
//!
//! let cache = SmartCache::connect(Settings::from_env()?).await?;
//!
//! let profile = cache
//!     .memoize("users::profile")
//!     .ttl(Duration::from_secs(300))
//!     .depends_on("users")
//!     .build(|id: u64| async move { db::load_profile(id).await })?;
//!
//! let first = profile.call(7).await?;   // computed
//! let again = profile.call(7).await?;   // served from cache
//!
//! db::rename_user(7, "new name").await?;
//! cache.invalidate_dependency("users").await?;  // every profile is now stale
//! ```
//!
//! ## Methods
//!
//! Methods are memoized over the receiver's identity rather than its full
//! contents. Implement [`CacheIdentity`] and pass the receiver wrapped in
//! [`Identity`]:
//!
//! ```rust,ignore
//! impl CacheIdentity for Account {
//!     fn cache_kind(&self) -> &'static str {
//!         "billing::Account"
//!     }
//!
//!     fn cache_identity(&self) -> String {
//!         self.id.to_string()
//!     }
//! }
//!
//! let balance = cache
//!     .memoize("accounts::balance")
//!     .depends_on("ledger")
//!     .build(|(account, currency): (Identity<Account>, String)| async move {
//!         account.0.balance_in(&currency).await
//!     })?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod client;
mod invalidation;
mod memoize;
mod stats;

pub use client::SmartCache;
pub use memoize::{MemoizeBuilder, Memoized};
pub use stats::StatsRecorder;

pub use smartcache_core::error::{Result, SmartCacheError};
pub use smartcache_core::settings::{BackendKind, Settings};
pub use smartcache_core::traits::{CacheBackend, CacheIdentity};
pub use smartcache_core::types::{CacheKey, CacheStats, CachedEntry, CallSignature, Identity};
pub use smartcache_keys::{derive_call_key, derive_dependency_key};
