//! Stampede Coordinator
//!
//! Guarantees at most one loader execution per key across concurrent callers.
//!
//! Within a process, callers for the same key attach to one flight.
//! Across processes, the flight's driver competes for a distributed lock: the
//! holder loads, the others poll the cache for the holder's result.
//!
//! The driver runs on its own task, so a caller that gives up (its future is
//! dropped) never cancels the load the other waiters depend on.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, StatsCollector};
use crate::config::StampedeConfig;
use crate::error::{CacheError, Result};
use crate::store::DistributedLock;

/// Runs the loader and writes its result through the tiers.
pub type LoadFuture = BoxFuture<'static, Result<Value>>;

/// Looks for a fresh value produced by someone else.
pub type Probe = Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

// == Fallback ==
/// What a follower does when the leader's value never shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StampedeFallback {
    /// Run the loader anyway, accepting duplicate work
    #[default]
    Load,
    /// Fail with `LockAcquisitionTimeout`
    Error,
    /// Return an empty result
    Null,
}

impl FromStr for StampedeFallback {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(StampedeFallback::Load),
            "error" => Ok(StampedeFallback::Error),
            "null" | "none" => Ok(StampedeFallback::Null),
            other => Err(format!("unknown stampede fallback '{}'", other)),
        }
    }
}

// == Options ==
#[derive(Debug, Clone)]
pub struct StampedeOptions {
    pub lock_timeout: Duration,
    pub wait_timeout: Duration,
    pub fallback: StampedeFallback,
    pub poll_interval: Duration,
    /// Take the distributed lock; without it only in-process coalescing applies
    pub coordinated: bool,
}

impl From<&StampedeConfig> for StampedeOptions {
    fn from(config: &StampedeConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout,
            wait_timeout: config.wait_timeout,
            fallback: config.fallback,
            poll_interval: config.poll_interval,
            coordinated: true,
        }
    }
}

// == Flight ==
#[derive(Debug, Clone)]
struct FlightResult {
    outcome: Result<Option<Value>>,
    /// Whether this process ran the loader for the result
    loaded_here: bool,
}

/// Bookkeeping for one in-progress load of a key.
#[derive(Debug)]
struct StampedeFlight {
    /// Lock token owned by this flight
    token: String,
    started_at: Instant,
    /// Callers that attached after the flight started
    waiters: AtomicUsize,
    result: watch::Receiver<Option<FlightResult>>,
}

/// Removes the flight when the driver finishes, including by panic.
struct FlightGuard {
    flights: Arc<DashMap<String, Arc<StampedeFlight>>>,
    key: String,
    token: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights
            .remove_if(&self.key, |_, flight| flight.token == self.token);
    }
}

// == Stampede Coordinator ==
pub struct StampedeCoordinator {
    flights: Arc<DashMap<String, Arc<StampedeFlight>>>,
    lock: Arc<dyn DistributedLock>,
    lock_prefix: String,
    enabled: bool,
    stats: Arc<StatsCollector>,
}

impl StampedeCoordinator {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        config: &StampedeConfig,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            lock,
            lock_prefix: config.lock_prefix.clone(),
            enabled: config.enabled,
            stats,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.contains_key(key)
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Callers waiting on the flight for `key`, besides the one that started it.
    pub fn waiters(&self, key: &str) -> Option<usize> {
        self.flights
            .get(key)
            .map(|f| f.value().waiters.load(Ordering::Relaxed))
    }

    // == Execute ==
    /// Produces the value for `key`, running `load` at most once among all
    /// concurrent callers.
    ///
    /// `load` is only polled if this caller ends up starting the flight;
    /// otherwise it is dropped untouched.
    ///
    /// # Arguments
    /// * `key` - Validated cache key the flight is registered under
    /// * `load` - Loader plus write-through, run by the flight's driver
    /// * `probe` - Checks the tiers for a fresh value written by someone else
    /// * `options` - Lock and wait timeouts, fallback and poll interval
    ///
    /// # Returns
    /// * `Ok(Some(value))` - Value loaded here or observed from another loader
    /// * `Ok(None)` - Only under the `Null` fallback
    /// * `Err(CacheError::LockAcquisitionTimeout)` - Under the `Error` fallback
    /// * `Err(CacheError::Loader)` - The loader failed; shared by every waiter
    pub async fn execute(
        &self,
        key: &CacheKey,
        load: LoadFuture,
        probe: Probe,
        options: &StampedeOptions,
    ) -> Result<Option<Value>> {
        if !self.enabled {
            let outcome = load.await;
            if matches!(outcome, Err(CacheError::Loader(_))) {
                self.stats.record_loader_error();
            }
            return outcome.map(Some);
        }

        let (flight, driver) = match self.flights.entry(key.as_str().to_string()) {
            Entry::Occupied(occupied) => {
                let flight = Arc::clone(occupied.get());
                let waiters = flight.waiters.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    key = %key,
                    waiters,
                    elapsed_ms = flight.started_at.elapsed().as_millis() as u64,
                    "Joined in-flight load"
                );
                (flight, None)
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let flight = Arc::new(StampedeFlight {
                    token: Uuid::new_v4().to_string(),
                    started_at: Instant::now(),
                    waiters: AtomicUsize::new(0),
                    result: rx,
                });
                vacant.insert(Arc::clone(&flight));
                (flight, Some(tx))
            }
        };

        let leader = driver.is_some();
        if let Some(tx) = driver {
            self.spawn_driver(key, &flight, tx, load, probe, options.clone());
        }

        let mut rx = flight.result.clone();
        drop(flight);
        let received = rx.wait_for(Option::is_some).await.map(|r| r.clone());
        let result = match received {
            Ok(Some(result)) => result,
            _ => {
                return Err(CacheError::Internal(format!(
                    "load of '{}' was abandoned",
                    key
                )))
            }
        };

        let served_by_someone_else = !leader || !result.loaded_here;
        if served_by_someone_else && matches!(result.outcome, Ok(Some(_))) {
            self.stats.record_stampede_prevented();
        }
        result.outcome
    }

    fn spawn_driver(
        &self,
        key: &CacheKey,
        flight: &StampedeFlight,
        tx: watch::Sender<Option<FlightResult>>,
        load: LoadFuture,
        probe: Probe,
        options: StampedeOptions,
    ) {
        let guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.as_str().to_string(),
            token: flight.token.clone(),
        };
        let driver = Driver {
            key: key.clone(),
            lock: Arc::clone(&self.lock),
            lock_key: format!("{}{}", self.lock_prefix, key),
            token: flight.token.clone(),
            options,
        };
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let result = driver.run(load, probe).await;
            if matches!(result.outcome, Err(CacheError::Loader(_))) {
                stats.record_loader_error();
            }
            // Publish before unregistering so late joiners still see the result
            tx.send_replace(Some(result));
            drop(guard);
        });
    }
}

// == Driver ==
/// Leader/follower protocol for one flight.
struct Driver {
    key: CacheKey,
    lock: Arc<dyn DistributedLock>,
    lock_key: String,
    token: String,
    options: StampedeOptions,
}

impl Driver {
    async fn run(self, load: LoadFuture, probe: Probe) -> FlightResult {
        // A previous flight may have completed between the caller's miss and now
        if let Ok(Some(value)) = probe().await {
            return observed(Some(value));
        }

        if !self.options.coordinated {
            return loaded(load.await);
        }

        match self
            .lock
            .try_acquire(&self.lock_key, &self.token, self.options.lock_timeout)
            .await
        {
            Ok(true) => {
                let outcome = load.await;
                self.release().await;
                loaded(outcome)
            }
            Ok(false) => self.follow(load, probe).await,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Lock unavailable, loading without coordination");
                loaded(load.await)
            }
        }
    }

    /// Polls for the lock holder's value, then applies the fallback.
    async fn follow(&self, load: LoadFuture, probe: Probe) -> FlightResult {
        let deadline = Instant::now() + self.options.wait_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;

            match probe().await {
                Ok(Some(value)) => {
                    debug!(key = %self.key, "Observed value loaded by another process");
                    return observed(Some(value));
                }
                Ok(None) => {}
                Err(e) => debug!(key = %self.key, error = %e, "Probe failed while waiting"),
            }
        }

        match self.options.fallback {
            StampedeFallback::Load => {
                warn!(key = %self.key, "Wait timed out, loading without the lock");
                loaded(load.await)
            }
            StampedeFallback::Error => FlightResult {
                outcome: Err(CacheError::LockAcquisitionTimeout {
                    key: self.key.to_string(),
                    waited: self.options.wait_timeout,
                }),
                loaded_here: false,
            },
            StampedeFallback::Null => observed(None),
        }
    }

    async fn release(&self) {
        match self.lock.release(&self.lock_key, &self.token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(key = %self.key, "Lock expired before release; another owner may hold it")
            }
            Err(e) => warn!(key = %self.key, error = %e, "Lock release failed"),
        }
    }
}

fn loaded(outcome: Result<Value>) -> FlightResult {
    FlightResult {
        outcome: outcome.map(Some),
        loaded_here: true,
    }
}

fn observed(value: Option<Value>) -> FlightResult {
    FlightResult {
        outcome: Ok(value),
        loaded_here: false,
    }
}
