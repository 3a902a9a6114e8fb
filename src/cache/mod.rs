//! Cache Module
//!
//! Two-tier caching: a bounded in-process L1 in front of a shared L2 store,
//! with stampede coalescing, stale-while-revalidate and tag invalidation.

mod entry;
mod eviction;
mod key;
mod l1;
mod l2;
mod options;
mod orchestrator;
mod stampede;
mod stats;
mod swr;
mod tags;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, Freshness};
pub use eviction::{EvictionPolicy, EvictionStrategy, FifoStrategy, LfuStrategy, LruStrategy};
pub use key::{
    CacheKey, KeyOptions, Tag, TagSet, DEFAULT_MAX_KEY_LENGTH, DEFAULT_MAX_TAGS,
    DEFAULT_MAX_TAG_LENGTH,
};
pub use l1::L1Cache;
pub use l2::L2Store;
pub use options::{CacheOptions, TagSource, TierStrategy, WrapOptions};
pub use orchestrator::{CachedFn, TieredCache, TieredCacheBuilder};
pub use stampede::{LoadFuture, Probe, StampedeCoordinator, StampedeFallback, StampedeOptions};
pub use stats::{CacheStats, L1Stats, L2Stats, StatsCollector, SwrStats};
pub use swr::SwrManager;
pub use tags::{InvalidationReport, TagIndex, TagWriteReport};
