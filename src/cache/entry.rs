//! Cache Entry Module
//!
//! Defines the stored envelope with its freshness timestamps.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Freshness ==
/// Where an entry sits in its lifetime at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `now < stale_at`
    Fresh,
    /// `stale_at <= now < expires_at`; serve and revalidate
    Stale,
    /// `now >= expires_at`; treat as a miss
    Expired,
}

// == Cache Entry ==
/// A cached value with its lifetime markers (Unix milliseconds).
///
/// Invariant: `cached_at <= stale_at <= expires_at`. Entries are only ever
/// replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The stored value
    pub value: serde_json::Value,
    pub cached_at: u64,
    pub stale_at: u64,
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    ///
    /// Without a stale time the entry is fresh until it expires. With one,
    /// it turns stale after `ttl` and expires after `max(ttl, stale_time)`.
    pub fn new(value: serde_json::Value, ttl: Duration, stale_time: Option<Duration>) -> Self {
        Self::at(value, current_timestamp_ms(), ttl, stale_time)
    }

    /// Creates an entry stamped with an explicit `now`.
    pub fn at(
        value: serde_json::Value,
        now: u64,
        ttl: Duration,
        stale_time: Option<Duration>,
    ) -> Self {
        let ttl_ms = duration_ms(ttl);
        let lifetime_ms = match stale_time {
            Some(stale) => ttl_ms.max(duration_ms(stale)),
            None => ttl_ms,
        };

        Self {
            value,
            cached_at: now,
            stale_at: now.saturating_add(ttl_ms),
            expires_at: now.saturating_add(lifetime_ms),
        }
    }

    // == Freshness ==
    pub fn freshness_at(&self, now: u64) -> Freshness {
        if now >= self.expires_at {
            Freshness::Expired
        } else if now >= self.stale_at {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness_at(current_timestamp_ms())
    }

    /// Checks if the entry has expired.
    ///
    /// Boundary condition: the entry is expired once the current time is
    /// greater than or equal to `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.freshness() == Freshness::Expired
    }

    /// Whether the entry has a stale-while-revalidate window at all.
    pub fn has_stale_window(&self) -> bool {
        self.stale_at < self.expires_at
    }

    // == Time To Live ==
    /// Time left until `expires_at`, zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        let now = current_timestamp_ms();
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_stale_time() {
        let entry = CacheEntry::at(json!("v"), 1_000, Duration::from_secs(5), None);

        assert_eq!(entry.cached_at, 1_000);
        assert_eq!(entry.stale_at, 6_000);
        assert_eq!(entry.expires_at, 6_000);
        assert!(!entry.has_stale_window());
    }

    #[test]
    fn test_stale_time_longer_than_ttl_extends_expiry() {
        // ttl=5s, staleTime=15s: stale after 5s, gone after 15s
        let entry = CacheEntry::at(
            json!("v"),
            0,
            Duration::from_secs(5),
            Some(Duration::from_secs(15)),
        );

        assert_eq!(entry.stale_at, 5_000);
        assert_eq!(entry.expires_at, 15_000);
        assert!(entry.has_stale_window());
    }

    #[test]
    fn test_stale_time_shorter_than_ttl_has_no_window() {
        let entry = CacheEntry::at(
            json!("v"),
            0,
            Duration::from_secs(60),
            Some(Duration::from_secs(10)),
        );

        assert_eq!(entry.stale_at, 60_000);
        assert_eq!(entry.expires_at, 60_000);
        assert!(!entry.has_stale_window());
    }

    #[test]
    fn test_timestamps_ordered() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(1), Some(Duration::from_secs(3)));
        assert!(entry.cached_at <= entry.stale_at);
        assert!(entry.stale_at <= entry.expires_at);
    }

    #[test]
    fn test_freshness_boundaries() {
        let entry = CacheEntry::at(
            json!("v"),
            0,
            Duration::from_secs(1),
            Some(Duration::from_secs(2)),
        );

        assert_eq!(entry.freshness_at(999), Freshness::Fresh);
        assert_eq!(entry.freshness_at(1_000), Freshness::Stale);
        assert_eq!(entry.freshness_at(1_999), Freshness::Stale);
        assert_eq!(entry.freshness_at(2_000), Freshness::Expired);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            value: json!("test"),
            cached_at: now,
            stale_at: now,
            expires_at: now,
        };

        assert!(entry.is_expired(), "Entry should be expired at boundary");
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_envelope_serializes() {
        let entry = CacheEntry::at(json!({"id": 7}), 10, Duration::from_secs(1), None);
        let bytes = serde_json::to_vec(&entry).unwrap();
        let decoded: CacheEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }
}
