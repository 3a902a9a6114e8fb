//! L2 Store Adapter
//!
//! Thin wrapper over the shared store: key prefixing, entry encoding and TTL
//! clamping. Expiry is always left to the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{CacheEntry, CacheKey, StatsCollector};
use crate::config::L2Config;
use crate::error::{CacheError, Result};
use crate::store::SharedStore;

// == L2 Store ==
pub struct L2Store {
    store: Arc<dyn SharedStore>,
    prefix: String,
    default_ttl: Duration,
    max_ttl: Duration,
    stats: Arc<StatsCollector>,
}

impl L2Store {
    pub fn new(store: Arc<dyn SharedStore>, config: &L2Config, stats: Arc<StatsCollector>) -> Self {
        Self {
            store,
            prefix: config.key_prefix.clone(),
            default_ttl: config.default_ttl,
            max_ttl: config.max_ttl,
            stats,
        }
    }

    /// Storage key for a cache key.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// TTL to apply for a requested TTL: default when absent, clamped to the maximum.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_ttl).min(self.max_ttl)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // == Get ==
    /// Reads an entry.
    ///
    /// `Ok(None)` is a miss; an unreachable store is an error. A payload that
    /// no longer decodes, or a key holding the wrong value type, is logged
    /// and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let bytes = match self.store.get(&self.storage_key(key.as_str())).await {
            Ok(bytes) => bytes,
            Err(e @ CacheError::StoreRejected(_)) => {
                warn!(key = %key, error = %e, "L2 rejected read, treating as miss");
                self.stats.record_l2_error();
                self.stats.record_l2_miss();
                return Ok(None);
            }
            Err(e) => {
                self.stats.record_l2_error();
                return Err(e);
            }
        };

        match bytes.map(|b| serde_json::from_slice::<CacheEntry>(&b)) {
            Some(Ok(entry)) if !entry.is_expired() => {
                self.stats.record_l2_hit();
                Ok(Some(entry))
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Undecodable L2 entry, treating as miss");
                self.stats.record_l2_miss();
                Ok(None)
            }
            _ => {
                self.stats.record_l2_miss();
                Ok(None)
            }
        }
    }

    /// Reads an entry without touching hit/miss counters.
    pub async fn peek(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let bytes = self.store.get(&self.storage_key(key.as_str())).await?;
        Ok(bytes
            .and_then(|b| serde_json::from_slice::<CacheEntry>(&b).ok())
            .filter(|entry| !entry.is_expired()))
    }

    // == Set ==
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        let result = self
            .store
            .set(&self.storage_key(key.as_str()), bytes, ttl.min(self.max_ttl))
            .await;
        if result.is_err() {
            self.stats.record_l2_error();
        }
        result
    }

    // == Delete ==
    /// Deletes fully-qualified cache keys, returning how many existed.
    pub async fn del<S: AsRef<str>>(&self, keys: &[S]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let storage_keys: Vec<String> = keys.iter().map(|k| self.storage_key(k.as_ref())).collect();
        let result = self.store.del(&storage_keys).await;
        if result.is_err() {
            self.stats.record_l2_error();
        }
        result
    }

    // == Batch ==
    pub async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<CacheEntry>>> {
        let storage_keys: Vec<String> = keys.iter().map(|k| self.storage_key(k.as_str())).collect();
        let values = self.store.mget(&storage_keys).await?;
        Ok(values
            .into_iter()
            .map(|bytes| {
                bytes
                    .and_then(|b| serde_json::from_slice::<CacheEntry>(&b).ok())
                    .filter(|entry| !entry.is_expired())
            })
            .collect())
    }

    pub async fn mset(&self, entries: &[(CacheKey, CacheEntry)], ttl: Duration) -> Result<()> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            encoded.push((self.storage_key(key.as_str()), serde_json::to_vec(entry)?));
        }
        self.store.mset(encoded, ttl.min(self.max_ttl)).await
    }

    /// Deletes every entry under this adapter's prefix.
    pub async fn purge(&self) -> Result<u64> {
        self.store.purge_prefix(&self.prefix).await
    }
}
