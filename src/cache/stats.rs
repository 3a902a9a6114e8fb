//! Cache Statistics Module
//!
//! Counters updated as side effects of cache operations, read as snapshots.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Stats Collector ==
/// Shared, lock-free counters.
///
/// Every component holds an `Arc<StatsCollector>` and bumps counters as it
/// works, so a snapshot is O(1) and never computed from cache contents.
#[derive(Debug, Default)]
pub struct StatsCollector {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l1_size: AtomicUsize,
    l1_evictions: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    stampede_prevented: AtomicU64,
    swr_active: AtomicUsize,
    swr_completed: AtomicU64,
    loader_errors: AtomicU64,
    tag_index_failures: AtomicU64,
    invalidated_keys: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_eviction(&self) {
        self.l1_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// L1 occupancy, the one non-monotonic counter.
    pub fn set_l1_size(&self, size: usize) {
        self.l1_size.store(size, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stampede_prevented(&self) {
        self.stampede_prevented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revalidation_started(&self) {
        self.swr_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revalidation_finished(&self) {
        self.swr_active.fetch_sub(1, Ordering::Relaxed);
        self.swr_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loader_error(&self) {
        self.loader_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tag_index_failure(&self) {
        self.tag_index_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, count: usize) {
        self.invalidated_keys.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active_revalidations(&self) -> usize {
        self.swr_active.load(Ordering::Relaxed)
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            l1: L1Stats {
                hits: self.l1_hits.load(Ordering::Relaxed),
                misses: self.l1_misses.load(Ordering::Relaxed),
                size: self.l1_size.load(Ordering::Relaxed),
                evictions: self.l1_evictions.load(Ordering::Relaxed),
            },
            l2: L2Stats {
                hits: self.l2_hits.load(Ordering::Relaxed),
                misses: self.l2_misses.load(Ordering::Relaxed),
                errors: self.l2_errors.load(Ordering::Relaxed),
            },
            stampede_prevented: self.stampede_prevented.load(Ordering::Relaxed),
            swr: SwrStats {
                active_revalidations: self.swr_active.load(Ordering::Relaxed),
                completed: self.swr_completed.load(Ordering::Relaxed),
            },
            loader_errors: self.loader_errors.load(Ordering::Relaxed),
            tag_index_failures: self.tag_index_failures.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }
}

// == Cache Stats ==
/// Immutable snapshot of the engine's counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1: L1Stats,
    pub l2: L2Stats,
    pub stampede_prevented: u64,
    pub swr: SwrStats,
    pub loader_errors: u64,
    /// Writes whose tag membership could not be recorded
    pub tag_index_failures: u64,
    pub invalidated_keys: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct L1Stats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct L2Stats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SwrStats {
    pub active_revalidations: usize,
    pub completed: u64,
}

impl L1Stats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }
}

impl L2Stats {
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsCollector::new().snapshot();
        assert_eq!(stats.l1.hits, 0);
        assert_eq!(stats.l1.misses, 0);
        assert_eq!(stats.l1.size, 0);
        assert_eq!(stats.l2.hits, 0);
        assert_eq!(stats.stampede_prevented, 0);
        assert_eq!(stats.swr.active_revalidations, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = StatsCollector::new().snapshot();
        assert_eq!(stats.l1.hit_rate(), 0.0);
        assert_eq!(stats.l2.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let collector = StatsCollector::new();
        collector.record_l1_hit();
        collector.record_l1_miss();
        collector.record_l2_hit();
        collector.record_l2_hit();
        collector.record_l2_hit();
        collector.record_l2_miss();

        let stats = collector.snapshot();
        assert_eq!(stats.l1.hit_rate(), 0.5);
        assert_eq!(stats.l2.hit_rate(), 0.75);
    }

    #[test]
    fn test_l1_size_tracks_occupancy() {
        let collector = StatsCollector::new();
        collector.set_l1_size(42);
        collector.set_l1_size(7);
        assert_eq!(collector.snapshot().l1.size, 7);
    }

    #[test]
    fn test_revalidation_gauge() {
        let collector = StatsCollector::new();
        collector.revalidation_started();
        collector.revalidation_started();
        assert_eq!(collector.active_revalidations(), 2);

        collector.revalidation_finished();
        let stats = collector.snapshot();
        assert_eq!(stats.swr.active_revalidations, 1);
        assert_eq!(stats.swr.completed, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let collector = StatsCollector::new();
        let before = collector.snapshot();
        collector.record_stampede_prevented();
        assert_eq!(before.stampede_prevented, 0);
        assert_eq!(collector.snapshot().stampede_prevented, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = StatsCollector::new();
        collector.record_invalidated(3);
        let json = serde_json::to_value(collector.snapshot()).unwrap();
        assert_eq!(json["invalidated_keys"], 3);
        assert_eq!(json["l1"]["hits"], 0);
    }
}
