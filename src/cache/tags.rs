//! Tag Index
//!
//! Tag -> member-key sets kept in the shared store, so that entries written
//! by any process can be invalidated together.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheKey, L1Cache, L2Store, StatsCollector, Tag, TagSet};
use crate::config::TagsConfig;
use crate::error::{CacheError, Result};
use crate::store::SharedStore;

// == Reports ==
/// Outcome of recording one entry's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagWriteReport {
    pub indexed: usize,
    pub failed: usize,
}

/// Outcome of a bulk invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Distinct keys removed
    pub invalidated: usize,
    /// Tags whose member set could not be read
    pub failed_tags: Vec<String>,
}

// == Tag Index ==
pub struct TagIndex {
    store: Arc<dyn SharedStore>,
    l1: Option<Arc<L1Cache>>,
    l2: Arc<L2Store>,
    index_prefix: String,
    /// Minimum lifetime of a member set
    min_ttl: Duration,
    stats: Arc<StatsCollector>,
}

impl TagIndex {
    pub fn new(
        store: Arc<dyn SharedStore>,
        l1: Option<Arc<L1Cache>>,
        l2: Arc<L2Store>,
        config: &TagsConfig,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            store,
            l1,
            l2,
            index_prefix: config.index_prefix.clone(),
            min_ttl: config.ttl,
            stats,
        }
    }

    fn index_key(&self, tag: &Tag) -> String {
        format!("{}{}", self.index_prefix, tag)
    }

    // == Add ==
    /// Records `key` under each tag and extends each set's TTL to cover the entry.
    ///
    /// Failures are logged and counted, never returned: the entry is already
    /// cached and stays readable, it just may outlive an invalidation.
    pub async fn add(&self, key: &CacheKey, tags: &TagSet, entry_ttl: Duration) -> TagWriteReport {
        let mut report = TagWriteReport::default();
        let member = [key.as_str().to_string()];
        let wanted = entry_ttl.max(self.min_ttl);

        for tag in tags.iter() {
            match self.index_one(&self.index_key(tag), &member, wanted).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    report.failed += 1;
                    self.stats.record_tag_index_failure();
                    warn!(key = %key, tag = %tag, error = %e, "Tag index write failed");
                }
            }
        }
        report
    }

    async fn index_one(&self, index_key: &str, member: &[String], wanted: Duration) -> Result<()> {
        self.store.sadd(index_key, member).await?;
        // Only ever extend: a longer-lived sibling entry keeps the set alive
        let current = self.store.ttl(index_key).await?;
        if current.map_or(true, |ttl| ttl < wanted) {
            self.store.expire(index_key, wanted).await?;
        }
        Ok(())
    }

    /// Current members of one tag.
    pub async fn members(&self, tag: &Tag) -> Result<Vec<String>> {
        self.store.smembers(&self.index_key(tag)).await
    }

    // == Invalidate ==
    /// Removes every key carrying any of `tags` from L1 and L2.
    ///
    /// A tag whose members cannot be read is skipped and reported in
    /// `failed_tags`; the call fails only when no tag could be read because
    /// the store is unreachable.
    ///
    /// # Arguments
    /// * `tags` - Validated tags; their member sets are unioned
    ///
    /// # Returns
    /// * `Ok(report)` - Distinct keys removed and the tags that could not be read
    /// * `Err(CacheError::StoreUnavailable)` - Every tag failed with the store down
    pub async fn invalidate(&self, tags: &TagSet) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut keys: Vec<String> = Vec::new();
        let mut last_error = None;

        for tag in tags.iter() {
            match self.members(tag).await {
                Ok(members) => {
                    for member in members {
                        if seen.insert(member.clone()) {
                            keys.push(member);
                        }
                    }
                }
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Could not read tag members");
                    report.failed_tags.push(tag.to_string());
                    last_error = Some(e);
                }
            }
        }

        if !tags.is_empty() && report.failed_tags.len() == tags.len() {
            if let Some(e @ CacheError::StoreUnavailable(_)) = last_error {
                return Err(e);
            }
        }

        if let Some(l1) = &self.l1 {
            l1.delete_many(&keys);
        }
        if !keys.is_empty() {
            if let Err(e) = self.l2.del(&keys).await {
                warn!(error = %e, count = keys.len(), "Could not delete tagged keys from L2");
                return Err(e);
            }
        }

        let index_keys: Vec<String> = tags
            .iter()
            .filter(|tag| !report.failed_tags.contains(&tag.to_string()))
            .map(|tag| self.index_key(tag))
            .collect();
        if !index_keys.is_empty() {
            if let Err(e) = self.store.del(&index_keys).await {
                warn!(error = %e, "Could not delete tag sets");
            }
        }

        report.invalidated = keys.len();
        self.stats.record_invalidated(keys.len());
        debug!(
            tags = tags.len(),
            invalidated = report.invalidated,
            "Tag invalidation complete"
        );
        Ok(report)
    }

    /// Deletes every tag set under the index prefix.
    pub async fn purge(&self) -> Result<u64> {
        self.store.purge_prefix(&self.index_prefix).await
    }
}
