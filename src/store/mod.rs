//! Shared Store Module
//!
//! Collaborator contracts for the network key-value store behind L2 and the
//! distributed lock used for stampede protection.
//!
//! # Implementations
//! - [`MemoryStore`]: in-process, for single-node use and tests
//! - [`RedisStore`]: pooled Redis connection shared across processes

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

// == Shared Store ==
/// Key-value store with TTL enforced by the store itself.
///
/// Every method distinguishes "not found" (an `Ok` empty value) from the
/// store being unreachable (`Err(CacheError::StoreUnavailable)`).
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Deletes the given keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()>;

    /// Sets a key's TTL, returning false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Adds members to the set at `key`, returning how many were new.
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Deletes every key starting with `prefix`.
    async fn purge_prefix(&self, prefix: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

// == Distributed Lock ==
/// Cross-process mutual exclusion with token-gated release.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Sets `key` to `token` only if absent, expiring after `ttl`.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if it still holds `token`.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}
