//! L1 Cache Module
//!
//! Bounded in-process tier: HashMap storage, pluggable eviction, per-entry TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheEntry, EvictionStrategy, StatsCollector};
use crate::error::{CacheError, Result};

// == L1 Slot ==
#[derive(Debug)]
struct Slot {
    entry: Arc<CacheEntry>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, Slot>,
    strategy: Box<dyn EvictionStrategy>,
}

// == L1 Cache ==
/// In-process cache tier.
///
/// A single mutex guards both reads and writes: reads restamp the eviction
/// strategy, so they mutate too.
#[derive(Debug)]
pub struct L1Cache {
    inner: Mutex<Inner>,
    /// Maximum number of entries allowed
    max_size: usize,
    stats: Arc<StatsCollector>,
}

impl L1Cache {
    // == Constructor ==
    pub fn new(
        max_size: usize,
        strategy: Box<dyn EvictionStrategy>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                strategy,
            }),
            max_size,
            stats,
        }
    }

    // == Set ==
    /// Stores an entry for `ttl`.
    ///
    /// Overwrites count as an access. A new key at capacity first evicts the
    /// strategy's victim.
    ///
    /// # Arguments
    /// * `key` - Fully-qualified cache key
    /// * `entry` - Shared entry, also handed to readers without copying
    /// * `ttl` - How long the entry stays in L1
    ///
    /// # Returns
    /// The evicted key, if any, or `CacheError::CacheFull` when the strategy
    /// yields no victim.
    pub fn set(&self, key: &str, entry: Arc<CacheEntry>, ttl: Duration) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        let slot = Slot {
            entry,
            inserted_at: Instant::now(),
            ttl,
        };

        if let Some(existing) = inner.entries.get_mut(key) {
            *existing = slot;
            inner.strategy.record_access(key);
            return Ok(None);
        }

        let mut evicted = None;
        if inner.entries.len() >= self.max_size {
            let victim = inner.strategy.select_victim().ok_or_else(|| {
                CacheError::CacheFull("L1 is full and no eviction victim is tracked".to_string())
            })?;
            inner.entries.remove(&victim);
            inner.strategy.record_delete(&victim);
            self.stats.record_l1_eviction();
            debug!(key = %victim, "L1 eviction");
            evicted = Some(victim);
        }

        inner.entries.insert(key.to_string(), slot);
        inner.strategy.record_insert(key);
        self.stats.set_l1_size(inner.entries.len());

        Ok(evicted)
    }

    // == Get ==
    /// Returns the entry if present and its L1 TTL has not elapsed.
    ///
    /// Expired slots are removed on the way out and counted as misses.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(slot) => slot.is_expired(Instant::now()),
            None => {
                self.stats.record_l1_miss();
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.strategy.record_delete(key);
            self.stats.set_l1_size(inner.entries.len());
            self.stats.record_l1_miss();
            return None;
        }

        inner.strategy.record_access(key);
        self.stats.record_l1_hit();
        inner.entries.get(key).map(|slot| Arc::clone(&slot.entry))
    }

    /// Like `get`, but leaves counters and eviction order untouched.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|slot| !slot.is_expired(Instant::now()))
            .map(|slot| Arc::clone(&slot.entry))
    }

    // == Delete ==
    /// Removes an entry by key, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.strategy.record_delete(key);
            self.stats.set_l1_size(inner.entries.len());
        }
        removed
    }

    /// Removes several keys under one lock, returning how many were present.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            let key = key.as_ref();
            if inner.entries.remove(key).is_some() {
                inner.strategy.record_delete(key);
                removed += 1;
            }
        }
        self.stats.set_l1_size(inner.entries.len());
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.strategy.clear();
        self.stats.set_l1_size(0);
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now) || slot.entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            inner.entries.remove(key);
            inner.strategy.record_delete(key);
        }

        self.stats.set_l1_size(inner.entries.len());
        expired_keys.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
