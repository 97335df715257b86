//! Memoized functions.
//!
//! A [`Memoized`] wraps an async function together with its cache name, TTL
//! and dependencies:
//!
//! ```text
//! call(args)
//!   key = {prefix}:call:sha3(name, args)
//!   entry valid and not stale  -> hit
//!   otherwise                  -> lock key, re-check, compute, store
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::types::{CacheKey, CachedEntry, CallSignature};
use smartcache_keys::derive_call_key;

use crate::client::SmartCache;
use crate::invalidation::Dependency;

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Configures a memoized function. Created by [`SmartCache::memoize`].
#[derive(Debug)]
#[must_use = "call build() to obtain the memoized function"]
pub struct MemoizeBuilder {
    cache: SmartCache,
    name: String,
    ttl: Option<Duration>,
    dependencies: Vec<String>,
}

impl MemoizeBuilder {
    pub(crate) fn new(cache: SmartCache, name: String) -> Self {
        let ttl = cache
            .settings()
            .default_timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);
        Self {
            cache,
            name,
            ttl,
            dependencies: Vec::new(),
        }
    }

    /// Sets the entry lifetime. A zero duration disables expiry.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Keeps entries until they are evicted or invalidated.
    pub fn no_expiry(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Declares a dependency; invalidating it makes every entry stale.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into().trim().to_string();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Wraps `function`.
    ///
    /// Fails if the name or a dependency name is empty.
    pub fn build<A, R, F, Fut, E>(self, function: F) -> Result<Memoized<A, R, F>>
    where
        A: Serialize,
        R: Serialize + DeserializeOwned,
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SmartCacheError::InvalidKey(
                "memoized function name is empty".into(),
            ));
        }

        let dependencies = self
            .dependencies
            .iter()
            .map(|dependency| self.cache.dependency(dependency))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            function = name,
            ttl = ?self.ttl,
            dependencies = ?self.dependencies,
            "Memoized function registered"
        );

        Ok(Memoized {
            name: name.to_string(),
            cache: self.cache,
            ttl: self.ttl,
            dependencies,
            function,
            in_flight: DashMap::new(),
            _marker: PhantomData,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMOIZED FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

enum Lookup<R> {
    Hit(R),
    Miss,
    Stale,
}

/// An async function whose results are cached per argument value.
///
/// `A` is the argument value (use a tuple for several arguments) and `R` the
/// result. Share it behind an `Arc` to call it from several tasks.
pub struct Memoized<A, R, F> {
    cache: SmartCache,
    name: String,
    ttl: Option<Duration>,
    dependencies: Vec<Dependency>,
    function: F,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F, Fut, E> Memoized<A, R, F>
where
    A: Serialize,
    R: Serialize + DeserializeOwned,
    F: Fn(A) -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Returns the cached result for `args`, computing it on a miss.
    #[instrument(skip_all, fields(function = %self.name))]
    pub async fn call(&self, args: A) -> Result<R> {
        let key = self.cache_key(&args)?;

        let Some(generations) = self.current_generations().await? else {
            return self.compute(args).await;
        };
        match self
            .cache
            .absorb("get", self.lookup(&key, &generations).await)?
        {
            Some(Lookup::Hit(value)) => {
                self.cache.recorder().record_hit();
                self.cache.trace_lookup("hit", &self.name, &key);
                return Ok(value);
            }
            Some(Lookup::Miss | Lookup::Stale) => {}
            None => return self.compute(args).await,
        }

        let in_flight = InFlight::enter(&self.in_flight, &key);
        let _guard = in_flight.lock.lock().await;
        self.fill(&key, args).await
    }

    /// Recomputes the result for `args` and overwrites the cached entry.
    #[instrument(skip_all, fields(function = %self.name))]
    pub async fn refresh(&self, args: A) -> Result<R> {
        let key = self.cache_key(&args)?;

        let in_flight = InFlight::enter(&self.in_flight, &key);
        let _guard = in_flight.lock.lock().await;
        self.recompute(&key, args).await
    }

    /// Removes the cached entry for `args`. Returns true if one existed.
    pub async fn invalidate(&self, args: &A) -> Result<bool> {
        let key = self.cache_key(args)?;
        let removed = self.cache.delete_key(&key).await?;
        debug!(function = %self.name, key = %key, removed, "Entry invalidated");
        Ok(removed)
    }

    /// Returns true if a valid, non-stale entry exists for `args`.
    pub async fn is_cached(&self, args: &A) -> Result<bool> {
        let key = self.cache_key(args)?;
        let generations = self.cache.dependency_generations(&self.dependencies).await?;
        Ok(matches!(
            self.lookup(&key, &generations).await?,
            Lookup::Hit(_)
        ))
    }

    /// Returns the backend key for `args`.
    pub fn cache_key(&self, args: &A) -> Result<CacheKey> {
        let signature = CallSignature::from_args(self.name.as_str(), args)?;
        derive_call_key(&self.cache.settings().key_prefix, &signature)
    }

    // Holding the key's lock. Another caller may have filled the entry while
    // this one waited.
    async fn fill(&self, key: &CacheKey, args: A) -> Result<R> {
        let Some(generations) = self.current_generations().await? else {
            return self.compute(args).await;
        };
        match self.cache.absorb("get", self.lookup(key, &generations).await)? {
            Some(Lookup::Hit(value)) => {
                self.cache.recorder().record_hit();
                self.cache.trace_lookup("hit", &self.name, key);
                return Ok(value);
            }
            Some(Lookup::Stale) => {
                self.cache.recorder().record_miss(true);
                self.cache.trace_lookup("stale", &self.name, key);
            }
            Some(Lookup::Miss) => {
                self.cache.recorder().record_miss(false);
                self.cache.trace_lookup("miss", &self.name, key);
            }
            None => return self.compute(args).await,
        }

        let value = self.compute(args).await?;
        self.store(key, &value, generations).await?;
        Ok(value)
    }

    async fn recompute(&self, key: &CacheKey, args: A) -> Result<R> {
        let generations = self.current_generations().await?;
        let value = self.compute(args).await?;
        if let Some(generations) = generations {
            self.store(key, &value, generations).await?;
        }
        self.cache.recorder().record_refresh();
        self.cache.trace_lookup("refresh", &self.name, key);
        Ok(value)
    }

    /// `None` when a backend failure was absorbed.
    async fn current_generations(&self) -> Result<Option<BTreeMap<String, u64>>> {
        let generations = self.cache.dependency_generations(&self.dependencies).await;
        self.cache.absorb("read dependencies", generations)
    }

    async fn lookup(&self, key: &CacheKey, generations: &BTreeMap<String, u64>) -> Result<Lookup<R>> {
        let Some(raw) = self.cache.backend().get(key).await? else {
            return Ok(Lookup::Miss);
        };

        let entry = match CachedEntry::decode(&raw) {
            Ok(entry) => entry,
            Err(e) => return self.discard(key, e).await,
        };

        if entry.is_expired(Utc::now()) {
            return Ok(Lookup::Miss);
        }
        let undeclared = generations
            .keys()
            .any(|name| !entry.dependencies.contains_key(name));
        if undeclared || entry.is_stale(generations) {
            return Ok(Lookup::Stale);
        }

        match entry.value_as::<R>() {
            Ok(value) => Ok(Lookup::Hit(value)),
            Err(e) => self.discard(key, e).await,
        }
    }

    async fn discard(&self, key: &CacheKey, reason: SmartCacheError) -> Result<Lookup<R>> {
        warn!(function = %self.name, key = %key, error = %reason, "Discarding unreadable entry");
        self.cache.backend().delete(key).await?;
        Ok(Lookup::Miss)
    }

    async fn compute(&self, args: A) -> Result<R> {
        (self.function)(args)
            .await
            .map_err(|e| SmartCacheError::ComputationFailed {
                function: self.name.clone(),
                source: Box::new(e),
            })
    }

    async fn store(&self, key: &CacheKey, value: &R, generations: BTreeMap<String, u64>) -> Result<()> {
        let bytes = match CachedEntry::new(value, self.ttl, generations).and_then(|entry| entry.encode()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(function = %self.name, error = %e, "Result not cacheable");
                return Ok(());
            }
        };
        let stored = self.cache.backend().set(key, bytes, self.ttl).await;
        self.cache.absorb("set", stored)?;
        Ok(())
    }
}

impl<A, R, F> Memoized<A, R, F> {
    /// Returns the name keys are derived from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared dependency names.
    pub fn dependencies(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.name.as_str()).collect()
    }

    /// Returns the entry lifetime, `None` if entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// A caller's share of a key's in-flight lock.
///
/// Dropping it, including when the caller's future is cancelled, removes the
/// map entry once no other caller holds the lock.
struct InFlight<'a> {
    map: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a DashMap<CacheKey, Arc<Mutex<()>>>, key: &CacheKey) -> Self {
        let lock = map.entry(key.clone()).or_default().clone();
        Self {
            map,
            key: key.clone(),
            lock,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // The map holds one reference and this guard the other.
        self.map.remove_if(&self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

impl<A, R, F> std::fmt::Debug for Memoized<A, R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use smartcache_core::settings::Settings;
    use smartcache_core::traits::{CacheBackend, CacheIdentity};
    use smartcache_core::types::Identity;
    use tokio_test::{assert_err, assert_ok};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    macro_rules! counted {
        ($calls:expr, |$arg:ident: $ty:ty| $body:expr) => {{
            let calls = $calls.clone();
            move |$arg: $ty| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    $body
                }
            }
        }};
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
        async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
        async fn delete(&self, _key: &CacheKey) -> Result<bool> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
        async fn incr(&self, _key: &CacheKey) -> Result<u64> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
        async fn purge(&self, _prefix: &str) -> Result<()> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
        async fn ping(&self) -> Result<()> {
            Err(SmartCacheError::backend("down", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        assert_eq!(double.call(21).await.unwrap(), 42);
        assert_eq!(double.call(21).await.unwrap(), 42);
        assert_eq!(double.call(5).await.unwrap(), 10);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_tuple_arguments() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let add = cache
            .memoize("math::add")
            .build(counted!(calls, |args: (i64, i64)| Ok::<_, Infallible>(args.0 + args.1)))
            .unwrap();

        assert_eq!(add.call((1, 2)).await.unwrap(), 3);
        assert_eq!(add.call((2, 1)).await.unwrap(), 3);
        assert_eq!(add.call((1, 2)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(add.cache_key(&(1, 2)).unwrap(), add.cache_key(&(2, 1)).unwrap());
    }

    #[tokio::test]
    async fn test_missing_and_empty_arguments_differ() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let count = cache
            .memoize("items::count")
            .build(counted!(calls, |items: Option<Vec<u32>>| {
                Ok::<_, Infallible>(items.map_or(-1, |items| items.len() as i64))
            }))
            .unwrap();

        assert_ne!(count.cache_key(&None).unwrap(), count.cache_key(&Some(vec![])).unwrap());
        assert_eq!(count.call(None).await.unwrap(), -1);
        assert_eq!(count.call(Some(vec![])).await.unwrap(), 0);
        assert_eq!(count.call(None).await.unwrap(), -1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_names_separate_entries() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let a = cache
            .memoize("a")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x)))
            .unwrap();
        let b = cache
            .memoize("b")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x + 1)))
            .unwrap();

        assert_eq!(a.call(1).await.unwrap(), 1);
        assert_eq!(b.call(1).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .ttl(Duration::from_millis(30))
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        double.call(1).await.unwrap();
        double.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        double.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_not_cached() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .ttl(Duration::from_secs(10_000_000_000_000))
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        assert_eq!(double.call(3).await.unwrap(), 6);
        assert!(!double.is_cached(&3).await.unwrap());
        assert_eq!(double.call(3).await.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_defaults_from_settings() {
        let cache = SmartCache::with_backend(
            Arc::new(smartcache_backends::MemoryBackend::new()),
            Settings::default().no_expiry(),
        );
        let f = cache
            .memoize("f")
            .build(|x: u32| async move { Ok::<_, Infallible>(x) })
            .unwrap();
        assert_eq!(f.ttl(), None);

        let g = SmartCache::in_memory()
            .memoize("g")
            .ttl(Duration::ZERO)
            .build(|x: u32| async move { Ok::<_, Infallible>(x) })
            .unwrap();
        assert_eq!(g.ttl(), None);

        let h = SmartCache::in_memory()
            .memoize("h")
            .build(|x: u32| async move { Ok::<_, Infallible>(x) })
            .unwrap();
        assert_eq!(h.ttl(), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_dependency_invalidation() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let profile = cache
            .memoize("users::profile")
            .depends_on("users")
            .depends_on(" users ")
            .depends_on("avatars")
            .build(counted!(calls, |id: u64| Ok::<_, Infallible>(format!("user-{id}"))))
            .unwrap();
        assert_eq!(profile.dependencies(), vec!["users", "avatars"]);

        profile.call(7).await.unwrap();
        profile.call(7).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(profile.is_cached(&7).await.unwrap());

        cache.invalidate_dependency("users").await.unwrap();
        assert!(!profile.is_cached(&7).await.unwrap());

        profile.call(7).await.unwrap();
        profile.call(7).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.invalidate_dependency("orders").await.unwrap();
        profile.call(7).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidation_survives_eviction_pressure() {
        let backend = Arc::new(smartcache_backends::MemoryBackend::with_capacity(3));
        let cache = SmartCache::with_backend(backend, Settings::default());
        let calls = counter();
        let profile = cache
            .memoize("users::profile")
            .depends_on("users")
            .build(counted!(calls, |id: u64| Ok::<_, Infallible>(format!("user-{id}"))))
            .unwrap();
        let other = cache
            .memoize("other")
            .build(|x: u32| async move { Ok::<_, Infallible>(x) })
            .unwrap();

        profile.call(1).await.unwrap();
        cache.invalidate_dependency("users").await.unwrap();
        // Reading the stale entry makes it the most recently used.
        assert!(!profile.is_cached(&1).await.unwrap());

        other.call(1).await.unwrap();
        other.call(2).await.unwrap();

        assert_eq!(cache.dependency_generation("users").await.unwrap(), 1);
        assert!(!profile.is_cached(&1).await.unwrap());
        profile.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_dependency_across_functions() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let count = cache
            .memoize("orders::count")
            .depends_on("orders")
            .build(counted!(calls, |_unit: ()| Ok::<_, Infallible>(3u32)))
            .unwrap();
        let total = cache
            .memoize("orders::total")
            .depends_on("orders")
            .build(counted!(calls, |_unit: ()| Ok::<_, Infallible>(120u32)))
            .unwrap();

        count.call(()).await.unwrap();
        total.call(()).await.unwrap();
        cache.invalidate_dependency("orders").await.unwrap();
        assert!(!count.is_cached(&()).await.unwrap());
        assert!(!total.is_cached(&()).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        double.call(4).await.unwrap();
        assert_eq!(double.refresh(4).await.unwrap(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().refreshes, 1);

        assert!(double.invalidate(&4).await.unwrap());
        assert!(!double.invalidate(&4).await.unwrap());
        assert!(!double.is_cached(&4).await.unwrap());

        double.call(4).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let parse = cache
            .memoize("parse")
            .build(counted!(calls, |s: String| s.parse::<u32>()))
            .unwrap();

        let err = parse.call("nope".into()).await.unwrap_err();
        assert!(matches!(err, SmartCacheError::ComputationFailed { ref function, .. } if function == "parse"));
        assert!(!parse.is_cached(&"nope".to_string()).await.unwrap());

        assert_err!(parse.call("nope".into()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(parse.call("12".into()).await.unwrap(), 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let slow = Arc::new(
            cache
                .memoize("slow")
                .build(counted!(calls, |x: u32| {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, Infallible>(x * 2)
                }))
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slow = slow.clone();
                tokio::spawn(async move { slow.call(21).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slow.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_callers_release_lock() {
        let cache = SmartCache::in_memory();
        let slow = Arc::new(
            cache
                .memoize("slow")
                .build(|x: u32| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, Infallible>(x * 2)
                })
                .unwrap(),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(10), slow.call(1)).await;
        assert!(abandoned.is_err());
        assert!(slow.in_flight.is_empty());

        let abandoned = tokio::time::timeout(Duration::from_millis(10), slow.refresh(1)).await;
        assert!(abandoned.is_err());
        assert!(slow.in_flight.is_empty());

        let computing = {
            let slow = slow.clone();
            tokio::spawn(async move { slow.call(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = tokio::time::timeout(Duration::from_millis(10), slow.call(2)).await;
        assert!(waiter.is_err());
        assert_eq!(slow.in_flight.len(), 1);

        assert_eq!(computing.await.unwrap().unwrap(), 4);
        assert!(slow.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_fail_open() {
        let cache = SmartCache::with_backend(Arc::new(DownBackend), Settings::default());
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .depends_on("numbers")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        assert_eq!(assert_ok!(double.call(2).await), 4);
        assert_eq!(assert_ok!(double.call(2).await), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.stats().backend_errors >= 2);

        assert_ok!(double.refresh(2).await);
        assert!(double.is_cached(&2).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_closed() {
        let settings = Settings {
            fail_open: false,
            ..Default::default()
        };
        let cache = SmartCache::with_backend(Arc::new(DownBackend), settings);
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        let err = double.call(2).await.unwrap_err();
        assert!(err.is_backend_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_recomputed() {
        let cache = SmartCache::in_memory();
        let calls = counter();
        let double = cache
            .memoize("math::double")
            .build(counted!(calls, |x: u32| Ok::<_, Infallible>(x * 2)))
            .unwrap();

        let key = double.cache_key(&3).unwrap();
        cache.backend().set(&key, b"{garbage".to_vec(), None).await.unwrap();
        assert_eq!(double.call(3).await.unwrap(), 6);
        assert!(double.is_cached(&3).await.unwrap());

        let wrong_type = CachedEntry::new("six", None, BTreeMap::new()).unwrap();
        cache
            .backend()
            .set(&key, wrong_type.encode().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(double.call(3).await.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identity_arguments() {
        #[derive(Clone)]
        struct Account {
            id: u64,
            balance_cents: i64,
        }

        impl CacheIdentity for Account {
            fn cache_kind(&self) -> &'static str {
                "accounts::Account"
            }

            fn cache_identity(&self) -> String {
                self.id.to_string()
            }
        }

        let cache = SmartCache::in_memory();
        let calls = counter();
        let owner = cache
            .memoize("accounts::owner")
            .build(counted!(calls, |account: Identity<Account>| {
                Ok::<_, Infallible>(format!("owner-{}", account.0.id))
            }))
            .unwrap();

        let before = Account { id: 9, balance_cents: 100 };
        let after = Account { balance_cents: -5, ..before.clone() };
        assert_ne!(before.balance_cents, after.balance_cents);

        owner.call(Identity(before)).await.unwrap();
        owner.call(Identity(after)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        owner.call(Identity(Account { id: 10, balance_cents: 0 })).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_names_rejected() {
        let cache = SmartCache::in_memory();
        let unnamed = cache
            .memoize("  ")
            .build(|x: u32| async move { Ok::<_, Infallible>(x) });
        assert!(unnamed.unwrap_err().is_key_error());

        let bad_dependency = cache
            .memoize("f")
            .depends_on("")
            .build(|x: u32| async move { Ok::<_, Infallible>(x) });
        assert!(bad_dependency.unwrap_err().is_key_error());
    }
}
