//! L1 Expiry Sweep
//!
//! Background task that periodically drops expired L1 entries, so memory is
//! reclaimed even for keys that are never read again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::L1Cache;

/// Spawns a task that sweeps `l1` every `interval` until `shutdown` is cancelled.
///
/// # Arguments
/// * `l1` - Shared L1 tier to sweep
/// * `interval` - Time between sweeps
/// * `shutdown` - Cancelled by `TieredCache::close` to stop the loop
///
/// # Returns
/// A JoinHandle that completes once the task has observed cancellation.
///
/// # Example
/// ```ignore
/// let shutdown = CancellationToken::new();
/// let handle = spawn_cleanup_task(l1.clone(), Duration::from_secs(1), shutdown.clone());
/// // Later, during shutdown:
/// shutdown.cancel();
/// handle.await?;
/// ```
pub fn spawn_cleanup_task(
    l1: Arc<L1Cache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting L1 cleanup task");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = l1.cleanup_expired();
            if removed > 0 {
                info!(removed, remaining = l1.len(), "L1 cleanup: removed expired entries");
            } else {
                debug!("L1 cleanup: no expired entries found");
            }
        }

        debug!("L1 cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, EvictionPolicy, StatsCollector};
    use serde_json::json;

    fn l1() -> Arc<L1Cache> {
        Arc::new(L1Cache::new(
            100,
            EvictionPolicy::Lru.build(),
            Arc::new(StatsCollector::new()),
        ))
    }

    fn entry() -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new(json!("value"), Duration::from_secs(3600), None))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = l1();
        cache.set("expire_soon", entry(), Duration::from_millis(50)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(100), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(300)).await;

        // Never read, so only the sweep could have removed it
        assert!(!cache.contains("expire_soon"), "Expired entry should have been cleaned up");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = l1();
        cache.set("long_lived", entry(), Duration::from_secs(3600)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(50), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.get("long_lived").is_some(), "Valid entry should not be removed");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let handle = spawn_cleanup_task(l1(), Duration::from_secs(60), shutdown.clone());

        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop promptly")
            .unwrap();
    }
}
