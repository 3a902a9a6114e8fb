//! Per-call options for reads, writes and wrapped functions.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::StampedeFallback;

// == Tier Strategy ==
/// Which tiers a call reads and writes, intersected with the enabled tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierStrategy {
    L1Only,
    L2Only,
    #[default]
    L1L2,
}

impl TierStrategy {
    pub fn uses_l1(self) -> bool {
        self != TierStrategy::L2Only
    }

    pub fn uses_l2(self) -> bool {
        self != TierStrategy::L1Only
    }
}

impl FromStr for TierStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l1-only" | "l1" => Ok(TierStrategy::L1Only),
            "l2-only" | "l2" => Ok(TierStrategy::L2Only),
            "l1-l2" | "both" => Ok(TierStrategy::L1L2),
            other => Err(format!("unknown tier strategy '{}'", other)),
        }
    }
}

// == Cache Options ==
/// Options for `get_with`, `set` and `get_or_set`.
///
/// Every field is optional; unset fields fall back to the engine config.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub strategy: TierStrategy,
    /// Extra dimensions appended to the raw key
    pub vary_by: Vec<String>,
    pub stale_time: Option<Duration>,
    pub lock_timeout: Option<Duration>,
    pub wait_timeout: Option<Duration>,
    pub fallback: Option<StampedeFallback>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn strategy(mut self, strategy: TierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn vary_by<I, S>(mut self, vary_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by = vary_by.into_iter().map(Into::into).collect();
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    pub fn wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = Some(wait_timeout);
        self
    }

    pub fn fallback(mut self, fallback: StampedeFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

// == Wrap Options ==
/// Where a wrapped function's tags come from.
pub enum TagSource<A> {
    /// Use the tags in the base options
    Static,
    /// Compute tags from the call's arguments
    Dynamic(Arc<dyn Fn(&A) -> Vec<String> + Send + Sync>),
}

impl<A> Clone for TagSource<A> {
    fn clone(&self) -> Self {
        match self {
            TagSource::Static => TagSource::Static,
            TagSource::Dynamic(f) => TagSource::Dynamic(Arc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for TagSource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagSource::Static => f.write_str("Static"),
            TagSource::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Options for `TieredCache::wrap`.
pub struct WrapOptions<A> {
    pub cache: CacheOptions,
    pub tags: TagSource<A>,
}

impl<A> Clone for WrapOptions<A> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl<A> fmt::Debug for WrapOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapOptions")
            .field("cache", &self.cache)
            .field("tags", &self.tags)
            .finish()
    }
}

impl<A> WrapOptions<A> {
    pub fn new(cache: CacheOptions) -> Self {
        Self {
            cache,
            tags: TagSource::Static,
        }
    }

    /// Derives tags from each call's arguments.
    pub fn tags_from<F>(mut self, f: F) -> Self
    where
        F: Fn(&A) -> Vec<String> + Send + Sync + 'static,
    {
        self.tags = TagSource::Dynamic(Arc::new(f));
        self
    }

    /// Options for one call with `args`.
    pub fn resolve(&self, args: &A) -> CacheOptions {
        let mut options = self.cache.clone();
        if let TagSource::Dynamic(f) = &self.tags {
            options.tags = f(args);
        }
        options
    }
}

impl<A> Default for WrapOptions<A> {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl<A> From<CacheOptions> for WrapOptions<A> {
    fn from(cache: CacheOptions) -> Self {
        Self::new(cache)
    }
}
