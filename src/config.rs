//! Configuration Module
//!
//! Handles loading and validating the cache engine configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{EvictionPolicy, StampedeFallback};
use crate::error::{CacheError, Result};

/// L1 (in-process) tier settings.
#[derive(Debug, Clone)]
pub struct L1Config {
    pub enabled: bool,
    /// Maximum number of entries held in process
    pub max_size: usize,
    /// Upper bound on how long an entry lives in L1
    pub ttl: Duration,
    pub eviction_policy: EvictionPolicy,
}

/// L2 (shared store) tier settings.
#[derive(Debug, Clone)]
pub struct L2Config {
    pub enabled: bool,
    /// TTL used when a call does not specify one
    pub default_ttl: Duration,
    /// Requested TTLs are clamped to this value
    pub max_ttl: Duration,
    /// Prefix prepended to every key written to the shared store
    pub key_prefix: String,
    /// Redis connection URL; `None` selects the in-process store
    pub url: Option<String>,
}

/// Stampede protection settings.
#[derive(Debug, Clone)]
pub struct StampedeConfig {
    pub enabled: bool,
    /// TTL of the distributed lock held by a leader
    pub lock_timeout: Duration,
    /// How long a follower polls for the leader's value
    pub wait_timeout: Duration,
    pub fallback: StampedeFallback,
    /// Delay between follower polls
    pub poll_interval: Duration,
    /// Prefix of distributed lock keys
    pub lock_prefix: String,
}

/// Stale-while-revalidate settings.
#[derive(Debug, Clone)]
pub struct SwrConfig {
    pub enabled: bool,
    /// Stale time applied when a call does not specify one
    pub default_stale_time: Option<Duration>,
}

/// Tag index settings.
#[derive(Debug, Clone)]
pub struct TagsConfig {
    pub enabled: bool,
    pub index_prefix: String,
    pub max_tags_per_key: usize,
    /// Minimum lifetime of a tag's member set
    pub ttl: Duration,
}

/// Key codec settings.
#[derive(Debug, Clone)]
pub struct KeysConfig {
    pub max_length: usize,
    pub version: Option<String>,
    pub separator: String,
    /// Namespace placed before the version and raw key
    pub prefix: String,
    pub max_tag_length: usize,
}

/// Complete engine configuration, consumed once at construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub stampede: StampedeConfig,
    pub swr: SwrConfig,
    pub tags: TagsConfig,
    pub keys: KeysConfig,
    /// Interval of the background L1 expiry sweep
    pub cleanup_interval: Duration,
    /// How long `close()` waits for background revalidations
    pub shutdown_grace: Duration,
}

// == Defaults ==
impl Default for L1Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl: Duration::from_secs(60),
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(86_400),
            key_prefix: "cache:data:".to_string(),
            url: None,
        }
    }
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(5),
            fallback: StampedeFallback::Load,
            poll_interval: Duration::from_millis(50),
            lock_prefix: "cache:lock:".to_string(),
        }
    }
}

impl Default for SwrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_stale_time: None,
        }
    }
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_prefix: "cache:tag:".to_string(),
            max_tags_per_key: 10,
            ttl: Duration::from_secs(86_400),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            max_length: 512,
            version: None,
            separator: ":".to_string(),
            prefix: String::new(),
            max_tag_length: 128,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            stampede: StampedeConfig::default(),
            swr: SwrConfig::default(),
            tags: TagsConfig::default(),
            keys: KeysConfig::default(),
            cleanup_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TIERCACHE_L1_ENABLED` / `TIERCACHE_L1_MAX_SIZE` / `TIERCACHE_L1_TTL` (seconds) /
    ///   `TIERCACHE_L1_EVICTION` (`lru`, `lfu`, `fifo`)
    /// - `TIERCACHE_L2_ENABLED` / `TIERCACHE_L2_DEFAULT_TTL` / `TIERCACHE_L2_MAX_TTL` (seconds) /
    ///   `TIERCACHE_L2_KEY_PREFIX` / `REDIS_URL`
    /// - `TIERCACHE_STAMPEDE_ENABLED` / `TIERCACHE_LOCK_TIMEOUT_MS` / `TIERCACHE_WAIT_TIMEOUT_MS` /
    ///   `TIERCACHE_STAMPEDE_FALLBACK` (`load`, `error`, `null`)
    /// - `TIERCACHE_SWR_ENABLED` / `TIERCACHE_SWR_STALE_TIME` (seconds)
    /// - `TIERCACHE_TAGS_ENABLED` / `TIERCACHE_TAGS_MAX_PER_KEY`
    /// - `TIERCACHE_KEY_VERSION` / `TIERCACHE_KEY_MAX_LENGTH`
    /// - `TIERCACHE_CLEANUP_INTERVAL` (seconds)
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            l1: L1Config {
                enabled: env_or("TIERCACHE_L1_ENABLED", defaults.l1.enabled),
                max_size: env_or("TIERCACHE_L1_MAX_SIZE", defaults.l1.max_size),
                ttl: env_secs("TIERCACHE_L1_TTL", defaults.l1.ttl),
                eviction_policy: env_or("TIERCACHE_L1_EVICTION", defaults.l1.eviction_policy),
            },
            l2: L2Config {
                enabled: env_or("TIERCACHE_L2_ENABLED", defaults.l2.enabled),
                default_ttl: env_secs("TIERCACHE_L2_DEFAULT_TTL", defaults.l2.default_ttl),
                max_ttl: env_secs("TIERCACHE_L2_MAX_TTL", defaults.l2.max_ttl),
                key_prefix: env::var("TIERCACHE_L2_KEY_PREFIX").unwrap_or(defaults.l2.key_prefix),
                url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            },
            stampede: StampedeConfig {
                enabled: env_or("TIERCACHE_STAMPEDE_ENABLED", defaults.stampede.enabled),
                lock_timeout: env_millis("TIERCACHE_LOCK_TIMEOUT_MS", defaults.stampede.lock_timeout),
                wait_timeout: env_millis("TIERCACHE_WAIT_TIMEOUT_MS", defaults.stampede.wait_timeout),
                fallback: env_or("TIERCACHE_STAMPEDE_FALLBACK", defaults.stampede.fallback),
                ..defaults.stampede
            },
            swr: SwrConfig {
                enabled: env_or("TIERCACHE_SWR_ENABLED", defaults.swr.enabled),
                default_stale_time: env::var("TIERCACHE_SWR_STALE_TIME")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs),
            },
            tags: TagsConfig {
                enabled: env_or("TIERCACHE_TAGS_ENABLED", defaults.tags.enabled),
                max_tags_per_key: env_or("TIERCACHE_TAGS_MAX_PER_KEY", defaults.tags.max_tags_per_key),
                ..defaults.tags
            },
            keys: KeysConfig {
                max_length: env_or("TIERCACHE_KEY_MAX_LENGTH", defaults.keys.max_length),
                version: env::var("TIERCACHE_KEY_VERSION").ok().filter(|v| !v.is_empty()),
                ..defaults.keys
            },
            cleanup_interval: env_secs("TIERCACHE_CLEANUP_INTERVAL", defaults.cleanup_interval),
            shutdown_grace: defaults.shutdown_grace,
        }
    }

    /// Rejects configurations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.l1.enabled && self.l1.max_size == 0 {
            return Err(invalid("l1.max_size must be at least 1"));
        }
        if self.l1.enabled && self.l1.ttl.is_zero() {
            return Err(invalid("l1.ttl must be greater than zero"));
        }
        if self.l2.default_ttl.is_zero() {
            return Err(invalid("l2.default_ttl must be greater than zero"));
        }
        if self.l2.default_ttl > self.l2.max_ttl {
            return Err(invalid("l2.default_ttl must not exceed l2.max_ttl"));
        }
        if self.stampede.enabled
            && (self.stampede.lock_timeout.is_zero()
                || self.stampede.wait_timeout.is_zero()
                || self.stampede.poll_interval.is_zero())
        {
            return Err(invalid("stampede timeouts and poll interval must be greater than zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup_interval must be greater than zero"));
        }
        if self.keys.separator.is_empty() {
            return Err(invalid("keys.separator must not be empty"));
        }
        if self.keys.max_length == 0 || self.keys.max_tag_length == 0 {
            return Err(invalid("key and tag length limits must be greater than zero"));
        }
        self.validate_namespaces()
    }

    /// Entry, lock and tag-set keys must live in disjoint key spaces.
    fn validate_namespaces(&self) -> Result<()> {
        let namespaces = [
            ("l2.key_prefix", &self.l2.key_prefix),
            ("stampede.lock_prefix", &self.stampede.lock_prefix),
            ("tags.index_prefix", &self.tags.index_prefix),
        ];

        for (i, (name, prefix)) in namespaces.iter().enumerate() {
            for (other_name, other) in namespaces.iter().skip(i + 1) {
                if prefix.starts_with(other.as_str()) || other.starts_with(prefix.as_str()) {
                    return Err(CacheError::InvalidConfig(format!(
                        "{} '{}' and {} '{}' overlap",
                        name, prefix, other_name, other
                    )));
                }
            }
        }
        Ok(())
    }
}

// == Env Helpers ==
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn invalid(msg: &str) -> CacheError {
    CacheError::InvalidConfig(msg.to_string())
}
