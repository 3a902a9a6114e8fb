//! Cache Orchestrator
//!
//! [`TieredCache`] composes the codec, both tiers, the tag index, the stampede
//! coordinator and the SWR manager behind get/set/get_or_set/wrap/invalidate.
//!
//! Reads go L1 then L2 (backfilling L1). Misses go through the stampede
//! coordinator, whose leader writes L2, then the tag index, then L1.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheKey, CacheOptions, CacheStats, EvictionStrategy, Freshness, KeyOptions,
    L1Cache, L2Store, LoadFuture, Probe, StampedeCoordinator, StampedeOptions, StatsCollector,
    SwrManager, TagIndex, TagSet, TierStrategy, WrapOptions,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::{DistributedLock, MemoryStore, SharedStore};
use crate::tasks::spawn_cleanup_task;

/// Tiers a single call touches.
#[derive(Debug, Clone, Copy)]
struct Tiers {
    l1: bool,
    l2: bool,
}

/// Everything needed to write one value through the tiers.
#[derive(Debug, Clone)]
struct WritePlan {
    ttl: Duration,
    stale_time: Option<Duration>,
    tags: TagSet,
    tiers: Tiers,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    closed: bool,
    shutdown: Option<CancellationToken>,
    cleanup: Option<JoinHandle<()>>,
}

struct Engine {
    config: CacheConfig,
    key_options: KeyOptions,
    store: Arc<dyn SharedStore>,
    l1: Option<Arc<L1Cache>>,
    l2: Arc<L2Store>,
    tags: Option<TagIndex>,
    stampede: Arc<StampedeCoordinator>,
    swr: SwrManager,
    stats: Arc<StatsCollector>,
    lifecycle: Mutex<Lifecycle>,
}

// == Builder ==
/// Wires the engine's collaborators.
///
/// Without an explicit store the engine uses an in-process [`MemoryStore`],
/// which makes it a single-node cache.
pub struct TieredCacheBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn SharedStore>>,
    lock: Option<Arc<dyn DistributedLock>>,
    eviction: Option<Box<dyn EvictionStrategy>>,
}

impl TieredCacheBuilder {
    /// Uses `store` for both L2 and the distributed lock.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: SharedStore + DistributedLock + 'static,
    {
        self.store = Some(store.clone());
        self.lock = Some(store);
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Overrides the strategy built from `l1.eviction_policy`.
    pub fn eviction(mut self, strategy: Box<dyn EvictionStrategy>) -> Self {
        self.eviction = Some(strategy);
        self
    }

    pub fn build(self) -> Result<TieredCache> {
        let config = self.config;
        config.validate()?;

        let local = Arc::new(MemoryStore::new());
        let store: Arc<dyn SharedStore> = match self.store {
            Some(store) => store,
            None => local.clone(),
        };
        let lock: Arc<dyn DistributedLock> = match self.lock {
            Some(lock) => lock,
            None => local,
        };

        let stats = Arc::new(StatsCollector::new());
        let eviction = self.eviction;
        let l1 = config.l1.enabled.then(|| {
            let strategy = eviction.unwrap_or_else(|| config.l1.eviction_policy.build());
            Arc::new(L1Cache::new(config.l1.max_size, strategy, Arc::clone(&stats)))
        });
        let l2 = Arc::new(L2Store::new(Arc::clone(&store), &config.l2, Arc::clone(&stats)));
        let tags = config.tags.enabled.then(|| {
            TagIndex::new(
                Arc::clone(&store),
                l1.clone(),
                Arc::clone(&l2),
                &config.tags,
                Arc::clone(&stats),
            )
        });
        let stampede = Arc::new(StampedeCoordinator::new(lock, &config.stampede, Arc::clone(&stats)));
        let swr = SwrManager::new(Arc::clone(&stampede), Arc::clone(&stats));

        info!(
            l1 = config.l1.enabled,
            l2 = config.l2.enabled,
            stampede = config.stampede.enabled,
            swr = config.swr.enabled,
            tags = config.tags.enabled,
            "Cache engine built"
        );

        Ok(TieredCache {
            engine: Arc::new(Engine {
                key_options: KeyOptions::from(&config.keys),
                config,
                store,
                l1,
                l2,
                tags,
                stampede,
                swr,
                stats,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }
}

// == Tiered Cache ==
/// Two-tier cache handle. Cloning is cheap and shares the engine.
#[derive(Clone)]
pub struct TieredCache {
    engine: Arc<Engine>,
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("l1", &self.engine.l1.as_ref().map(|l1| l1.len()))
            .field("in_flight", &self.engine.stampede.in_flight())
            .finish()
    }
}

impl TieredCache {
    pub fn builder(config: CacheConfig) -> TieredCacheBuilder {
        TieredCacheBuilder {
            config,
            store: None,
            lock: None,
            eviction: None,
        }
    }

    /// Single-node engine over an in-process store.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.engine.config
    }

    // == Get ==
    /// Reads a value without loading it. Stale values are returned as-is.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_with(key, &CacheOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &CacheOptions,
    ) -> Result<Option<T>> {
        let key = self.key(key, options)?;
        let tiers = self.tiers(options.strategy);
        match self.engine.lookup(&key, tiers).await? {
            Some(entry) => decode(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    // == Set ==
    /// Writes through L2 then L1, bypassing stampede protection.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &CacheOptions) -> Result<()> {
        let key = self.key(key, options)?;
        let plan = self.plan(options)?;
        let value = serde_json::to_value(value)?;
        self.engine.commit(&key, value, &plan).await?;
        Ok(())
    }

    // == Get Or Set ==
    /// Returns the cached value, or loads, caches and returns it.
    ///
    /// Concurrent misses for one key share a single loader run. A stale hit
    /// is returned immediately and refreshed in the background.
    ///
    /// # Arguments
    /// * `key` - Raw cache key; `options.vary_by` parts are appended
    /// * `loader` - Produces the value on a miss; runs at most once per flight
    /// * `options` - TTL, tags, tier strategy, stale time and stampede overrides
    ///
    /// # Returns
    /// * `Ok(Some(value))` - Cached, stale or freshly loaded value
    /// * `Ok(None)` - The `Null` fallback fired and the value never appeared
    /// * `Err(CacheError::Loader)` - The loader failed; nothing was cached
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: &CacheOptions,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = self.key(key, options)?;
        let plan = self.plan(options)?;
        let tiers = plan.tiers;

        if let Some(entry) = self.engine.lookup(&key, tiers).await? {
            if self.engine.config.swr.enabled && entry.freshness() == Freshness::Stale {
                let scheduled = self.engine.swr.revalidate(
                    &key,
                    self.load_future(key.clone(), loader, plan),
                    self.probe(key.clone(), tiers),
                    self.stampede_options(options, tiers),
                );
                debug!(key = %key, scheduled, "Served stale entry");
            }
            return decode(&entry.value).map(Some);
        }

        let value = self
            .engine
            .stampede
            .execute(
                &key,
                self.load_future(key.clone(), loader, plan),
                self.probe(key.clone(), tiers),
                &self.stampede_options(options, tiers),
            )
            .await?;

        value.as_ref().map(decode).transpose()
    }

    // == Wrap ==
    /// Turns `func` into a cached function keyed by `key_builder(args)`.
    pub fn wrap<A, T, K, F, Fut>(&self, key_builder: K, func: F, options: WrapOptions<A>) -> CachedFn<A, T>
    where
        A: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        K: Fn(&A) -> String + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        CachedFn {
            cache: self.clone(),
            key_builder: Arc::new(key_builder),
            func: Arc::new(move |args| func(args).boxed()),
            options,
        }
    }

    // == Delete ==
    /// Removes `key` from both tiers, returning whether any tier held it.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.key(key, &CacheOptions::default())?;
        let in_l1 = self
            .engine
            .l1
            .as_ref()
            .is_some_and(|l1| l1.delete(key.as_str()));

        if !self.engine.config.l2.enabled {
            return Ok(in_l1);
        }
        match self.engine.l2.del(&[key.as_str()]).await {
            Ok(removed) => Ok(in_l1 || removed > 0),
            Err(e) if self.engine.l1.is_some() && e.is_unavailable() => {
                warn!(key = %key, error = %e, "L2 unavailable, deleted from L1 only");
                Ok(in_l1)
            }
            Err(e) => Err(e),
        }
    }

    // == Invalidate Tags ==
    /// Removes every entry carrying any of `tags` from both tiers.
    ///
    /// # Arguments
    /// * `tags` - Raw tags, normalized before lookup
    ///
    /// # Returns
    /// The number of distinct keys invalidated. Tags whose member set could
    /// not be read are logged and skipped.
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<usize> {
        let Some(index) = &self.engine.tags else {
            debug!("Tag index disabled, nothing to invalidate");
            return Ok(0);
        };
        let tags = TagSet::create(tags, usize::MAX, self.engine.config.keys.max_tag_length)?;
        let report = index.invalidate(&tags).await?;
        if !report.failed_tags.is_empty() {
            warn!(
                failed = ?report.failed_tags,
                invalidated = report.invalidated,
                "Tag invalidation partially failed"
            );
        }
        Ok(report.invalidated)
    }

    // == Clear ==
    /// Empties L1 and deletes every L2 entry and tag set under the configured prefixes.
    pub async fn clear(&self) -> Result<()> {
        if let Some(l1) = &self.engine.l1 {
            l1.clear();
        }
        if self.engine.config.l2.enabled {
            let removed = self.engine.l2.purge().await?;
            debug!(removed, "Purged L2 entries");
        }
        if let Some(index) = &self.engine.tags {
            index.purge().await?;
        }
        info!("Cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.engine.stats.snapshot()
    }

    // == Lifecycle ==
    /// Checks the shared store and starts the L1 expiry sweep.
    ///
    /// An unreachable store is logged, not fatal: calls degrade to L1.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.engine.lifecycle.lock();
            if lifecycle.closed {
                return Err(CacheError::Internal("cache has been closed".to_string()));
            }
            if lifecycle.started {
                return Ok(());
            }
            lifecycle.started = true;

            if let Some(l1) = &self.engine.l1 {
                let token = CancellationToken::new();
                lifecycle.cleanup = Some(spawn_cleanup_task(
                    Arc::clone(l1),
                    self.engine.config.cleanup_interval,
                    token.clone(),
                ));
                lifecycle.shutdown = Some(token);
            }
        }

        if self.engine.config.l2.enabled {
            match self.engine.store.ping().await {
                Ok(()) => info!("Shared store reachable"),
                Err(e) => warn!(error = %e, "Shared store unreachable, serving from L1 until it recovers"),
            }
        }
        info!("Cache engine started");
        Ok(())
    }

    /// Stops the sweep and waits up to `shutdown_grace` for background
    /// revalidations. Safe to call more than once.
    pub async fn close(&self) {
        let (shutdown, cleanup) = {
            let mut lifecycle = self.engine.lifecycle.lock();
            if lifecycle.closed {
                return;
            }
            lifecycle.closed = true;
            (lifecycle.shutdown.take(), lifecycle.cleanup.take())
        };

        if let Some(token) = shutdown {
            token.cancel();
        }
        if let Some(handle) = cleanup {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cleanup task ended abnormally");
            }
        }

        let drained = self.engine.swr.shutdown(self.engine.config.shutdown_grace).await;
        info!(drained, "Cache engine closed");
    }

    // == Helpers ==
    fn key(&self, raw: &str, options: &CacheOptions) -> Result<CacheKey> {
        CacheKey::with_vary(raw, &options.vary_by, &self.engine.key_options)
    }

    fn tiers(&self, strategy: TierStrategy) -> Tiers {
        Tiers {
            l1: self.engine.l1.is_some() && strategy.uses_l1(),
            l2: self.engine.config.l2.enabled && strategy.uses_l2(),
        }
    }

    fn plan(&self, options: &CacheOptions) -> Result<WritePlan> {
        let config = &self.engine.config;
        let tags = TagSet::create(&options.tags, config.tags.max_tags_per_key, config.keys.max_tag_length)?;
        let stale_time = if config.swr.enabled {
            options.stale_time.or(config.swr.default_stale_time)
        } else {
            None
        };

        Ok(WritePlan {
            ttl: self.engine.l2.effective_ttl(options.ttl),
            stale_time,
            tags,
            tiers: self.tiers(options.strategy),
        })
    }

    fn stampede_options(&self, options: &CacheOptions, tiers: Tiers) -> StampedeOptions {
        let base = StampedeOptions::from(&self.engine.config.stampede);
        StampedeOptions {
            lock_timeout: options.lock_timeout.unwrap_or(base.lock_timeout),
            wait_timeout: options.wait_timeout.unwrap_or(base.wait_timeout),
            fallback: options.fallback.unwrap_or(base.fallback),
            // Other processes only see results through L2
            coordinated: tiers.l2,
            ..base
        }
    }

    fn load_future<T, F, Fut>(&self, key: CacheKey, loader: F, plan: WritePlan) -> LoadFuture
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        async move {
            let loaded = loader().await.map_err(|e| {
                debug!(key = %key, error = %e, "Loader failed");
                CacheError::loader(e)
            })?;
            let value = serde_json::to_value(loaded)?;
            engine.commit(&key, value.clone(), &plan).await?;
            Ok(value)
        }
        .boxed()
    }

    fn probe(&self, key: CacheKey, tiers: Tiers) -> Probe {
        let engine = Arc::clone(&self.engine);
        Arc::new(move || {
            let engine = Arc::clone(&engine);
            let key = key.clone();
            async move { engine.fresh_value(&key, tiers).await }.boxed()
        })
    }
}

impl Engine {
    /// Finds a live entry, L1 first. L2 hits are copied into L1.
    async fn lookup(&self, key: &CacheKey, tiers: Tiers) -> Result<Option<Arc<CacheEntry>>> {
        let l1 = self.l1.as_ref().filter(|_| tiers.l1);

        if let Some(l1) = l1 {
            if let Some(entry) = l1.get(key.as_str()) {
                if !entry.is_expired() {
                    return Ok(Some(entry));
                }
                l1.delete(key.as_str());
            }
        }

        if !tiers.l2 {
            return Ok(None);
        }
        match self.l2.get(key).await {
            Ok(Some(entry)) => {
                let entry = Arc::new(entry);
                if let Some(l1) = l1 {
                    self.backfill(l1, key, &entry);
                }
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) if l1.is_some() && e.is_unavailable() => {
                warn!(key = %key, error = %e, "L2 unavailable, reading L1 only");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// A fresh value written by someone else, without touching hit counters.
    async fn fresh_value(&self, key: &CacheKey, tiers: Tiers) -> Result<Option<Value>> {
        let l1 = self.l1.as_ref().filter(|_| tiers.l1);

        if let Some(entry) = l1.and_then(|l1| l1.peek(key.as_str())) {
            if entry.freshness() == Freshness::Fresh {
                return Ok(Some(entry.value.clone()));
            }
        }
        if !tiers.l2 {
            return Ok(None);
        }

        match self.l2.peek(key).await? {
            Some(entry) if entry.freshness() == Freshness::Fresh => {
                let entry = Arc::new(entry);
                if let Some(l1) = l1 {
                    self.backfill(l1, key, &entry);
                }
                Ok(Some(entry.value.clone()))
            }
            _ => Ok(None),
        }
    }

    fn backfill(&self, l1: &L1Cache, key: &CacheKey, entry: &Arc<CacheEntry>) {
        let ttl = self.config.l1.ttl.min(entry.remaining_ttl());
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = l1.set(key.as_str(), Arc::clone(entry), ttl) {
            warn!(key = %key, error = %e, "L1 backfill failed");
        }
    }

    // == Write Through ==
    /// Writes L2, then the tag index, then L1.
    async fn commit(&self, key: &CacheKey, value: Value, plan: &WritePlan) -> Result<Arc<CacheEntry>> {
        let entry = Arc::new(CacheEntry::new(value, plan.ttl, plan.stale_time));
        let lifetime = Duration::from_millis(entry.expires_at - entry.cached_at);
        let l1 = self.l1.as_ref().filter(|_| plan.tiers.l1);

        if plan.tiers.l2 {
            match self.l2.set(key, &entry, lifetime).await {
                Ok(()) => {}
                Err(e) if l1.is_some() && e.is_unavailable() => {
                    warn!(key = %key, error = %e, "L2 unavailable, writing L1 only");
                }
                Err(e) => return Err(e),
            }
        }

        if !plan.tags.is_empty() {
            if let Some(index) = &self.tags {
                index.add(key, &plan.tags, lifetime).await;
            }
        }

        if let Some(l1) = l1 {
            l1.set(key.as_str(), Arc::clone(&entry), self.config.l1.ttl.min(lifetime))?;
        }
        Ok(entry)
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T> {
    Ok(T::deserialize(value)?)
}

// == Cached Fn ==
/// A function whose results are cached per argument-derived key.
pub struct CachedFn<A, T> {
    cache: TieredCache,
    key_builder: Arc<dyn Fn(&A) -> String + Send + Sync>,
    func: Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>,
    options: WrapOptions<A>,
}

impl<A, T> Clone for CachedFn<A, T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key_builder: Arc::clone(&self.key_builder),
            func: Arc::clone(&self.func),
            options: self.options.clone(),
        }
    }
}

impl<A, T> CachedFn<A, T>
where
    A: Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub async fn call(&self, args: A) -> Result<Option<T>> {
        let key = (self.key_builder)(&args);
        let options = self.options.resolve(&args);
        let func = Arc::clone(&self.func);
        self.cache.get_or_set(&key, move || func(args), &options).await
    }

    /// The cache key `args` map to, before prefixing.
    pub fn key_for(&self, args: &A) -> String {
        (self.key_builder)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, StampedeFallback};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn user(id: u32) -> User {
        User {
            id,
            name: format!("user-{}", id),
        }
    }

    fn engine() -> (TieredCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::builder(CacheConfig::default())
            .store(Arc::clone(&store))
            .build()
            .unwrap();
        (cache, store)
    }

    #[tokio::test]
    async fn test_get_or_set_loads_once_then_hits() {
        let (cache, _) = engine();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let found: Option<User> = cache
                .get_or_set(
                    "user:1",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(user(1))
                    },
                    &CacheOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(found, Some(user(1)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().l1.hits, 2);
    }

    #[tokio::test]
    async fn test_l2_hit_backfills_l1() {
        let (cache, store) = engine();
        cache.set("user:2", &user(2), &CacheOptions::default()).await.unwrap();

        // Only L2 knows the value now
        cache.engine.l1.as_ref().unwrap().clear();
        let found: Option<User> = cache.get("user:2").await.unwrap();

        assert_eq!(found, Some(user(2)));
        assert!(cache.engine.l1.as_ref().unwrap().contains("user:2"));
        assert!(store.get("cache:data:user:2").await.unwrap().is_some());
        assert_eq!(cache.stats().l2.hits, 1);
    }

    #[tokio::test]
    async fn test_strategy_limits_tiers() {
        let (cache, store) = engine();

        let l1_only = CacheOptions::new().strategy(TierStrategy::L1Only);
        cache.set("local", &1, &l1_only).await.unwrap();
        assert!(store.get("cache:data:local").await.unwrap().is_none());

        let l2_only = CacheOptions::new().strategy(TierStrategy::L2Only);
        cache.set("remote", &2, &l2_only).await.unwrap();
        assert!(!cache.engine.l1.as_ref().unwrap().contains("remote"));
        assert_eq!(cache.get::<i32>("remote").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_vary_by_partitions_keys() {
        let (cache, _) = engine();
        let en = CacheOptions::new().vary_by(["en"]);
        let fr = CacheOptions::new().vary_by(["fr"]);

        cache.set("greeting", &"hello", &en).await.unwrap();
        cache.set("greeting", &"bonjour", &fr).await.unwrap();

        assert_eq!(cache.get_with::<String>("greeting", &en).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(cache.get_with::<String>("greeting", &fr).await.unwrap().as_deref(), Some("bonjour"));
        assert_eq!(cache.get::<String>("greeting").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_loading() {
        let (cache, _) = engine();
        let result: Result<Option<u32>> = cache
            .get_or_set(
                "bad key",
                || async { Err::<u32, _>(anyhow::anyhow!("loader must not run")) },
                &CacheOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));
        assert_eq!(cache.stats().loader_errors, 0);
    }

    #[tokio::test]
    async fn test_too_many_tags_rejected() {
        let (cache, _) = engine();
        let tags: Vec<String> = (0..11).map(|i| format!("t{}", i)).collect();
        let result = cache.set("k", &1, &CacheOptions::new().tags(tags)).await;
        assert!(matches!(result, Err(CacheError::TooManyTags { count: 11, max: 10 })));
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_is_counted() {
        let (cache, _) = engine();
        let result: Result<Option<u32>> = cache
            .get_or_set(
                "k",
                || async { Err::<u32, _>(anyhow::anyhow!("db down")) },
                &CacheOptions::default(),
            )
            .await;

        match result {
            Err(CacheError::Loader(e)) => assert_eq!(e.to_string(), "db down"),
            other => panic!("expected loader error, got {:?}", other),
        }
        assert_eq!(cache.stats().loader_errors, 1);
        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let (cache, store) = engine();
        cache.set("k", &1, &CacheOptions::default()).await.unwrap();

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(store.get("cache:data:k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_down_degrades_to_l1() {
        let (cache, store) = engine();
        store.set_available(false);

        cache.set("k", &"v", &CacheOptions::default()).await.unwrap();
        assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.stats().l2.errors >= 1);
    }

    #[tokio::test]
    async fn test_store_down_without_l1_fails() {
        let store = Arc::new(MemoryStore::new());
        let mut config = CacheConfig::default();
        config.l1.enabled = false;
        let cache = TieredCache::builder(config).store(Arc::clone(&store)).build().unwrap();
        store.set_available(false);

        let result = cache.get::<u32>("k").await;
        assert!(matches!(result, Err(CacheError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_clear_purges_everything() {
        let (cache, store) = engine();
        cache
            .set("k", &1, &CacheOptions::new().tags(["t"]))
            .await
            .unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrap_with_dynamic_tags() {
        let (cache, _) = engine();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let find_user = cache.wrap(
            |id: &u32| format!("user:{}", id),
            move |id: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(user(id))
                }
            },
            WrapOptions::default().tags_from(|id: &u32| vec![format!("user-{}", id)]),
        );

        assert_eq!(find_user.call(7).await.unwrap(), Some(user(7)));
        assert_eq!(find_user.call(7).await.unwrap(), Some(user(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(find_user.key_for(&7), "user:7");

        assert_eq!(cache.invalidate_tags(&["user-7"]).await.unwrap(), 1);
        assert_eq!(find_user.call(7).await.unwrap(), Some(user(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_null_fallback_returns_none() {
        let (cache, store) = engine();
        store
            .try_acquire("cache:lock:k", "someone-else", Duration::from_secs(5))
            .await
            .unwrap();

        let options = CacheOptions::new()
            .fallback(StampedeFallback::Null)
            .wait_timeout(Duration::from_millis(60));
        let found: Option<u32> = cache
            .get_or_set("k", || async { Ok(1) }, &options)
            .await
            .unwrap();

        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_lifecycle_is_idempotent() {
        let (cache, _) = engine();
        cache.start().await.unwrap();
        cache.start().await.unwrap();
        cache.close().await;
        cache.close().await;
        assert!(cache.start().await.is_err());
    }

    #[tokio::test]
    async fn test_custom_eviction_strategy() {
        let mut config = CacheConfig::default();
        config.l1.max_size = 2;
        let cache = TieredCache::builder(config)
            .eviction(EvictionPolicy::Fifo.build())
            .build()
            .unwrap();
        let l1_only = CacheOptions::new().strategy(TierStrategy::L1Only);

        cache.set("a", &1, &l1_only).await.unwrap();
        cache.set("b", &2, &l1_only).await.unwrap();
        cache.get_with::<u32>("a", &l1_only).await.unwrap();
        cache.set("c", &3, &l1_only).await.unwrap();

        assert_eq!(cache.get_with::<u32>("a", &l1_only).await.unwrap(), None);
        assert_eq!(cache.stats().l1.evictions, 1);
    }
}
