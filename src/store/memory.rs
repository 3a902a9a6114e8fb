//! In-process store
//!
//! Implements the store and lock contracts over a mutex-guarded map. Used for
//! single-node deployments and as the shared backend in tests, where several
//! engines sharing one `MemoryStore` behave like separate processes.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DistributedLock, SharedStore};
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

// == Memory Store ==
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
    available: AtomicBool,
    commands: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            commands: AtomicU64::new(0),
        }
    }

    /// Simulates an outage: while unavailable every command fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of commands served so far.
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records.lock().values().filter(|r| r.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::StoreUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }

    /// Runs `f` on the live record map, dropping expired records first.
    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Record>) -> T) -> T {
        let mut records = self.records.lock();
        let now = Instant::now();
        if records.get(key).is_some_and(|r| !r.is_live(now)) {
            records.remove(key);
        }
        f(records.get_mut(key))
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Some(Instant::now() + ttl)
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::StoreRejected(format!("wrong value type at '{}'", key))
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.with_live(key, |record| match record {
            None => Ok(None),
            Some(Record {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check()?;
        self.records.lock().insert(
            key.to_string(),
            Record {
                value: Value::Bytes(value),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let mut records = self.records.lock();
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| records.remove(key))
            .filter(|record| record.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check()?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.with_live(key, |record| match record {
                Some(Record {
                    value: Value::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            });
            values.push(value);
        }
        Ok(values)
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        self.check()?;
        let mut records = self.records.lock();
        for (key, value) in entries {
            records.insert(
                key,
                Record {
                    value: Value::Bytes(value),
                    expires_at: deadline(ttl),
                },
            );
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        Ok(self.with_live(key, |record| match record {
            Some(record) => {
                record.expires_at = deadline(ttl);
                true
            }
            None => false,
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check()?;
        Ok(self.with_live(key, |record| {
            record
                .and_then(|r| r.expires_at)
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        }))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        let mut records = self.records.lock();
        let now = Instant::now();
        if records.get(key).is_some_and(|r| !r.is_live(now)) {
            records.remove(key);
        }
        let record = records.entry(key.to_string()).or_insert_with(|| Record {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut record.value {
            Value::Set(set) => Ok(members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count() as u64),
            Value::Bytes(_) => Err(wrong_type(key)),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        self.with_live(key, |record| match record {
            None => Ok(Vec::new()),
            Some(Record {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn purge_prefix(&self, prefix: &str) -> Result<u64> {
        self.check()?;
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|key, _| !key.starts_with(prefix));
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[async_trait]
impl DistributedLock for MemoryStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut records = self.records.lock();
        let now = Instant::now();
        if records.get(key).is_some_and(|r| r.is_live(now)) {
            return Ok(false);
        }
        records.insert(
            key.to_string(),
            Record {
                value: Value::Bytes(token.as_bytes().to_vec()),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        self.check()?;
        let mut records = self.records.lock();
        let now = Instant::now();
        let owned = records.get(key).is_some_and(|record| {
            record.is_live(now)
                && matches!(&record.value, Value::Bytes(held) if held.as_slice() == token.as_bytes())
        });
        if owned {
            records.remove(key);
        }
        Ok(owned)
    }
}
