//! # SmartCache Backends
//!
//! Storage backends for SmartCache.
//!
//! - **Memory**: In-process LRU with per-entry TTL, for tests and single-process use
//! - **Redis**: Shared cache over the `redis` crate (feature `redis`)
//! - **Memcached**: Shared cache over the memcached text protocol (feature `memcached`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use smartcache_backends::connect;
//! use smartcache_core::{BackendKind, Settings};
//!
//! let settings = Settings::for_backend(BackendKind::Redis).with_host("redis://cache:6379");
//! let backend = connect(&settings).await?;
//! backend.ping().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::settings::{BackendKind, Settings};
use smartcache_core::traits::CacheBackend;

mod memory;
#[cfg(feature = "memcached")]
mod memcached;
#[cfg(feature = "redis")]
mod redis_backend;

pub use memory::{MemoryBackend, MemoryConfig, MemoryStats};
#[cfg(feature = "memcached")]
pub use memcached::MemcachedBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;

// Re-export the trait from core
pub use smartcache_core::traits::CacheBackend as Backend;

/// Builds the backend selected by `settings`.
///
/// The memory and memcached backends connect lazily; redis connects eagerly
/// and fails here if the server cannot be reached within the connect timeout.
pub async fn connect(settings: &Settings) -> Result<Arc<dyn CacheBackend>> {
    settings.validate()?;
    let connect_timeout = Duration::from_secs(settings.connect_timeout_seconds);
    let host = settings.resolved_host();

    let backend: Arc<dyn CacheBackend> = match settings.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::with_config(MemoryConfig {
            max_entries: settings.max_entries,
            ..Default::default()
        })),

        #[cfg(feature = "redis")]
        BackendKind::Redis => Arc::new(RedisBackend::connect(&host, connect_timeout).await?),

        #[cfg(feature = "memcached")]
        BackendKind::Memcached => Arc::new(MemcachedBackend::new(host.clone(), connect_timeout)),

        #[allow(unreachable_patterns)]
        other => {
            return Err(SmartCacheError::ConfigError(format!(
                "backend '{other}' is not compiled in; enable the '{other}' feature"
            )))
        }
    };

    info!(backend = backend.name(), "Cache backend ready");
    Ok(backend)
}
