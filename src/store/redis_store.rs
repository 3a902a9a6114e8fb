//! Redis-backed store
//!
//! Implements the store and lock contracts over a deadpool connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{DistributedLock, SharedStore};
use crate::error::{CacheError, Result};

/// Deletes the lock only when it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const SCAN_BATCH: usize = 500;

// == Redis Store ==
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    release: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Builds a pool for `url` and checks that a connection can be made.
    pub async fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self> {
        let mut config = deadpool_redis::Config::from_url(url);
        if let Some(ref mut pool_config) = config.pool {
            pool_config.max_size = pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        }

        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        let store = Self::new(pool);
        store.ping().await?;
        info!(url = %url, "Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.pset_ex(key, value, millis(ttl)).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // MSET has no TTL, so pipeline one SET PX per entry atomically
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &entries {
            pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(millis(ttl)).ignore();
        }
        let mut conn = self.conn().await?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn().await?;
        let remaining: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // -2: missing, -1: no expiry
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let added: u64 = conn.sadd(key, members).await?;
        Ok(added)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn purge_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, removed, "Purged keys by prefix");
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for RedisStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
