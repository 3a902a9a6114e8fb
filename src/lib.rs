//! Tiercache - A two-tier cache engine
//!
//! Bounded in-process L1 in front of a shared L2 store, with request
//! coalescing under stampedes, stale-while-revalidate and tag invalidation.

pub mod cache;
pub mod config;
pub mod error;
pub mod store;
pub mod tasks;

pub use cache::{CacheOptions, CacheStats, CachedFn, TierStrategy, TieredCache, WrapOptions};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use store::{DistributedLock, MemoryStore, RedisStore, SharedStore};
pub use tasks::spawn_cleanup_task;
