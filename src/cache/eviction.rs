//! Eviction Strategies
//!
//! Recency and frequency bookkeeping used by L1 to pick eviction victims.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

// == Eviction Strategy ==
/// Bookkeeping consulted by L1 when it needs room.
///
/// Implementations only track keys; L1 owns the values and decides when to
/// call [`EvictionStrategy::select_victim`].
pub trait EvictionStrategy: Send + fmt::Debug {
    fn record_access(&mut self, key: &str);
    fn record_insert(&mut self, key: &str);
    fn record_delete(&mut self, key: &str);
    /// Key that should leave next, if any are tracked.
    fn select_victim(&self) -> Option<String>;
    fn len(&self) -> usize;
    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Eviction Policy ==
/// Configurable choice of strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
}

impl EvictionPolicy {
    pub fn build(self) -> Box<dyn EvictionStrategy> {
        match self {
            EvictionPolicy::Lru => Box::new(LruStrategy::new()),
            EvictionPolicy::Lfu => Box::new(LfuStrategy::new()),
            EvictionPolicy::Fifo => Box::new(FifoStrategy::new()),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

// == Stamp Index ==
/// Keys ordered by a strictly increasing logical clock.
///
/// The reverse map keeps `oldest` at O(log n).
#[derive(Debug, Default)]
struct StampIndex {
    clock: u64,
    stamps: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
}

impl StampIndex {
    fn stamp(&mut self, key: &str) {
        self.clock += 1;
        if let Some(previous) = self.stamps.insert(key.to_string(), self.clock) {
            self.order.remove(&previous);
        }
        self.order.insert(self.clock, key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    fn oldest(&self) -> Option<String> {
        self.order.values().next().cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }

    fn len(&self) -> usize {
        self.stamps.len()
    }

    fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}

// == LRU ==
/// Least recently used: every access or insert restamps the key.
#[derive(Debug, Default)]
pub struct LruStrategy {
    index: StampIndex,
}

impl LruStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionStrategy for LruStrategy {
    fn record_access(&mut self, key: &str) {
        self.index.stamp(key);
    }

    fn record_insert(&mut self, key: &str) {
        self.index.stamp(key);
    }

    fn record_delete(&mut self, key: &str) {
        self.index.remove(key);
    }

    fn select_victim(&self) -> Option<String> {
        self.index.oldest()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        self.index.clear();
    }
}

// == FIFO ==
/// First in, first out: only inserts stamp a key.
#[derive(Debug, Default)]
pub struct FifoStrategy {
    index: StampIndex,
}

impl FifoStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionStrategy for FifoStrategy {
    fn record_access(&mut self, _key: &str) {}

    fn record_insert(&mut self, key: &str) {
        if !self.index.contains(key) {
            self.index.stamp(key);
        }
    }

    fn record_delete(&mut self, key: &str) {
        self.index.remove(key);
    }

    fn select_victim(&self) -> Option<String> {
        self.index.oldest()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        self.index.clear();
    }
}

// == LFU ==
/// Least frequently used, ties broken by earliest insertion.
#[derive(Debug, Default)]
pub struct LfuStrategy {
    next_seq: u64,
    /// key -> (frequency, insertion sequence)
    counts: HashMap<String, (u64, u64)>,
    ranking: BTreeSet<(u64, u64, String)>,
}

impl LfuStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current access frequency of `key`.
    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.counts.get(key).map(|(freq, _)| *freq)
    }
}

impl EvictionStrategy for LfuStrategy {
    fn record_access(&mut self, key: &str) {
        let Some((freq, seq)) = self.counts.get_mut(key) else {
            return;
        };
        self.ranking.remove(&(*freq, *seq, key.to_string()));
        *freq += 1;
        self.ranking.insert((*freq, *seq, key.to_string()));
    }

    fn record_insert(&mut self, key: &str) {
        if self.counts.contains_key(key) {
            self.record_access(key);
            return;
        }
        self.next_seq += 1;
        self.counts.insert(key.to_string(), (1, self.next_seq));
        self.ranking.insert((1, self.next_seq, key.to_string()));
    }

    fn record_delete(&mut self, key: &str) {
        if let Some((freq, seq)) = self.counts.remove(key) {
            self.ranking.remove(&(freq, seq, key.to_string()));
        }
    }

    fn select_victim(&self) -> Option<String> {
        self.ranking.iter().next().map(|(_, _, key)| key.clone())
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.ranking.clear();
    }
}
