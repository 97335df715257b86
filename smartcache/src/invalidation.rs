//! Dependency-based invalidation.
//!
//! A dependency is a named piece of underlying data (a table, a user, a
//! config file). Each dependency has a generation counter in the backend.
//! Memoized entries record the generations they were computed against, and
//! bumping a generation makes every such entry stale at once, without
//! enumerating or deleting keys.
//!
//! ```text
//! {prefix}:dep:<digest>  ->  "3"
//!
//! entry.dependencies = { "users": 2 }   // computed before the last bump -> stale
//! ```

use std::collections::BTreeMap;

use tracing::{info, instrument};

use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::types::CacheKey;
use smartcache_keys::derive_dependency_key;

use crate::client::SmartCache;

/// A declared dependency and the key holding its generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Dependency {
    pub(crate) name: String,
    pub(crate) key: CacheKey,
}

impl SmartCache {
    pub(crate) fn dependency(&self, name: &str) -> Result<Dependency> {
        let name = name.trim();
        Ok(Dependency {
            key: derive_dependency_key(&self.settings().key_prefix, name)?,
            name: name.to_string(),
        })
    }

    /// Marks every entry computed against `name` as stale.
    ///
    /// Returns the dependency's new generation.
    #[instrument(skip(self))]
    pub async fn invalidate_dependency(&self, name: &str) -> Result<u64> {
        let dependency = self.dependency(name)?;
        let generation = self.backend().incr(&dependency.key).await?;
        self.recorder().record_invalidation();
        info!(dependency = %dependency.name, generation, "Dependency invalidated");
        Ok(generation)
    }

    /// Returns the current generation of `name` (0 if never invalidated).
    pub async fn dependency_generation(&self, name: &str) -> Result<u64> {
        let dependency = self.dependency(name)?;
        self.read_generation(&dependency.key).await
    }

    pub(crate) async fn read_generation(&self, key: &CacheKey) -> Result<u64> {
        match self.backend().get(key).await? {
            None => Ok(0),
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    SmartCacheError::CorruptEntry(format!("dependency counter {key} is not a number"))
                }),
        }
    }

    /// Reads the current generations of all `dependencies`.
    pub(crate) async fn dependency_generations(
        &self,
        dependencies: &[Dependency],
    ) -> Result<BTreeMap<String, u64>> {
        let mut generations = BTreeMap::new();
        for dependency in dependencies {
            let generation = self.read_generation(&dependency.key).await?;
            generations.insert(dependency.name.clone(), generation);
        }
        Ok(generations)
    }
}
