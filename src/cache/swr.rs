//! Stale-While-Revalidate Manager
//!
//! Schedules background refreshes for entries served stale. At most one
//! revalidation per key runs at a time in this process; the stampede
//! coordinator dedups across processes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, LoadFuture, Probe, StampedeCoordinator, StampedeOptions, StatsCollector};

/// Releases the per-key claim once the background task ends, however it ends.
struct Revalidation {
    pending: Arc<DashSet<String>>,
    key: String,
    stats: Arc<StatsCollector>,
}

impl Drop for Revalidation {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
        self.stats.revalidation_finished();
    }
}

// == SWR Manager ==
pub struct SwrManager {
    coordinator: Arc<StampedeCoordinator>,
    pending: Arc<DashSet<String>>,
    tracker: TaskTracker,
    stats: Arc<StatsCollector>,
}

impl SwrManager {
    pub fn new(coordinator: Arc<StampedeCoordinator>, stats: Arc<StatsCollector>) -> Self {
        Self {
            coordinator,
            pending: Arc::new(DashSet::new()),
            tracker: TaskTracker::new(),
            stats,
        }
    }

    /// Starts a background refresh of `key` unless one is already running.
    ///
    /// Returns whether a new revalidation was scheduled. Never blocks the
    /// caller; failures are logged and the stale entry stays in place.
    pub fn revalidate(
        &self,
        key: &CacheKey,
        load: LoadFuture,
        probe: Probe,
        options: StampedeOptions,
    ) -> bool {
        if self.tracker.is_closed() {
            debug!(key = %key, "Shutting down, skipping revalidation");
            return false;
        }
        // A foreground load of the same key will refresh it anyway
        if self.coordinator.is_in_flight(key.as_str()) {
            return false;
        }
        if !self.pending.insert(key.as_str().to_string()) {
            return false;
        }

        self.stats.revalidation_started();
        let claim = Revalidation {
            pending: Arc::clone(&self.pending),
            key: key.as_str().to_string(),
            stats: Arc::clone(&self.stats),
        };
        let coordinator = Arc::clone(&self.coordinator);
        let key = key.clone();

        self.tracker.spawn(async move {
            let _claim = claim;
            match coordinator.execute(&key, load, probe, &options).await {
                Ok(_) => debug!(key = %key, "Revalidated stale entry"),
                Err(e) => warn!(key = %key, error = %e, "Background revalidation failed"),
            }
        });
        true
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    /// Revalidations currently running.
    pub fn active(&self) -> usize {
        self.pending.len()
    }

    /// Stops accepting revalidations and waits up to `grace` for running ones.
    ///
    /// Returns false if some were still running when the grace period ended;
    /// those are left to finish or be dropped with the runtime.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let running = self.tracker.len();
        if running > 0 {
            info!(running, "Waiting for background revalidations");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Grace period elapsed with revalidations still running"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeyOptions, StampedeFallback};
    use crate::config::StampedeConfig;
    use crate::store::MemoryStore;
    use futures::FutureExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager() -> (SwrManager, Arc<StatsCollector>) {
        let stats = Arc::new(StatsCollector::new());
        let coordinator = Arc::new(StampedeCoordinator::new(
            Arc::new(MemoryStore::new()),
            &StampedeConfig::default(),
            Arc::clone(&stats),
        ));
        (SwrManager::new(coordinator, Arc::clone(&stats)), stats)
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::create(raw, &KeyOptions::default()).unwrap()
    }

    fn options() -> StampedeOptions {
        StampedeOptions {
            lock_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(1),
            fallback: StampedeFallback::Load,
            poll_interval: Duration::from_millis(20),
            coordinated: true,
        }
    }

    fn probe() -> Probe {
        Arc::new(|| async { Ok(None) }.boxed())
    }

    fn slow_load(calls: Arc<AtomicU32>, delay: Duration) -> LoadFuture {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<Value, _>(json!("fresh"))
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_one_revalidation_per_key() {
        let (swr, stats) = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let k = key("feed");

        assert!(swr.revalidate(&k, slow_load(Arc::clone(&calls), Duration::from_millis(100)), probe(), options()));
        assert!(!swr.revalidate(&k, slow_load(Arc::clone(&calls), Duration::ZERO), probe(), options()));
        assert!(swr.is_pending(k.as_str()));
        assert_eq!(stats.active_revalidations(), 1);

        assert!(swr.shutdown(Duration::from_secs(2)).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!swr.is_pending(k.as_str()));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.swr.active_revalidations, 0);
        assert_eq!(snapshot.swr.completed, 1);
    }

    #[tokio::test]
    async fn test_failed_revalidation_releases_claim() {
        let (swr, stats) = manager();
        let k = key("feed");
        let failing: LoadFuture =
            async { Err(crate::error::CacheError::loader(anyhow::anyhow!("boom"))) }.boxed();

        assert!(swr.revalidate(&k, failing, probe(), options()));
        assert!(swr.shutdown(Duration::from_secs(1)).await);

        assert!(!swr.is_pending(k.as_str()));
        assert_eq!(stats.snapshot().loader_errors, 1);
    }

    #[tokio::test]
    async fn test_no_revalidation_after_shutdown() {
        let (swr, _) = manager();
        let calls = Arc::new(AtomicU32::new(0));

        swr.shutdown(Duration::from_millis(10)).await;

        assert!(!swr.revalidate(&key("late"), slow_load(Arc::clone(&calls), Duration::ZERO), probe(), options()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_grace() {
        let (swr, _) = manager();
        let calls = Arc::new(AtomicU32::new(0));

        swr.revalidate(&key("slow"), slow_load(calls, Duration::from_secs(5)), probe(), options());

        assert!(!swr.shutdown(Duration::from_millis(50)).await);
    }
}
