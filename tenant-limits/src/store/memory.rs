//! In-process key-value store.
//!
//! Mirrors the Redis store semantics (expiry, scripted counter operations,
//! watch conflicts) without a server, for tests and local development.

use super::{parse_count, KeyValueStore, WatchedKey};
use crate::error::{LimitsError, LimitsResult, SCRIPT_OVERFLOW};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Store state. `versions` outlives deleted keys so a watch notices a key
/// that was written and removed again.
#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    next_version: u64,
}

impl Inner {
    /// Drop the key if its expiry has passed.
    fn purge(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge(key);
        self.entries.get_mut(key)
    }

    fn touch(&mut self, key: &str) {
        self.next_version += 1;
        self.versions.insert(key.to_string(), self.next_version);
    }

    fn version_of(&mut self, key: &str) -> u64 {
        self.purge(key);
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn put(&mut self, key: &str, value: Value, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        self.touch(key);
    }

    fn read_count(&mut self, key: &str) -> LimitsResult<Option<i64>> {
        match self.live(key) {
            Some(Entry {
                value: Value::Str(raw),
                ..
            }) => parse_count(key, raw).map(Some),
            Some(_) => Err(LimitsError::store(format!("wrong value type at {key}"))),
            None => Ok(None),
        }
    }

    /// Overwrite the value of an existing key, keeping or resetting its expiry.
    fn update_count(&mut self, key: &str, value: i64, ttl: Option<Duration>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = Value::Str(value.to_string());
            if let Some(ttl) = ttl {
                entry.expires_at = Some(Instant::now() + ttl);
            }
            self.touch(key);
        }
    }
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner.entries.keys().cloned().collect();
        for key in &keys {
            inner.purge(key);
        }
        inner.entries.len()
    }

    /// Check if the store holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key, if it has an expiry.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock();
        inner
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> LimitsResult<Option<String>> {
        let mut inner = self.inner.lock();
        match inner.live(key) {
            Some(Entry {
                value: Value::Str(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(_) => Err(LimitsError::store(format!("wrong value type at {key}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<()> {
        self.inner
            .lock()
            .put(key, Value::Str(value.to_string()), ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<bool> {
        let mut inner = self.inner.lock();
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.put(key, Value::Str(value.to_string()), ttl);
        Ok(true)
    }

    async fn del(&self, key: &str) -> LimitsResult<()> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            inner.touch(key);
        }
        Ok(())
    }

    async fn incr_existing(
        &self,
        key: &str,
        delta: i64,
        ceiling: Option<i64>,
        ttl: Option<Duration>,
    ) -> LimitsResult<i64> {
        if delta < 0 {
            return Err(LimitsError::invalid_argument(format!(
                "NEGATIVE_DELTA {delta}"
            )));
        }
        let mut inner = self.inner.lock();
        let current = inner
            .read_count(key)?
            .ok_or_else(|| LimitsError::not_found(key))?;
        let mut next = current.checked_add(delta).ok_or_else(|| {
            LimitsError::invalid_argument(format!("{SCRIPT_OVERFLOW} {key} + {delta}"))
        })?;
        if let Some(ceiling) = ceiling {
            next = next.min(ceiling);
        }
        inner.update_count(key, next, ttl);
        Ok(next)
    }

    async fn decr_existing(&self, key: &str, delta: i64) -> LimitsResult<i64> {
        if delta < 0 {
            return Err(LimitsError::invalid_argument(format!(
                "NEGATIVE_DELTA {delta}"
            )));
        }
        let mut inner = self.inner.lock();
        let current = inner
            .read_count(key)?
            .ok_or_else(|| LimitsError::not_found(key))?;
        let next = current
            .checked_sub(delta)
            .filter(|next| *next >= 0)
            .ok_or_else(|| LimitsError::underflow(key))?;
        inner.update_count(key, next, None);
        Ok(next)
    }

    async fn set_gt(&self, key: &str, candidate: i64, ttl: Option<Duration>) -> LimitsResult<i64> {
        let mut inner = self.inner.lock();
        match inner.read_count(key)? {
            Some(current) if current >= candidate => Ok(current),
            Some(_) => {
                inner.update_count(key, candidate, ttl);
                Ok(candidate)
            }
            None => {
                inner.put(key, Value::Str(candidate.to_string()), ttl);
                Ok(candidate)
            }
        }
    }

    async fn watch(&self, key: &str) -> LimitsResult<Box<dyn WatchedKey>> {
        let version = self.inner.lock().version_of(key);
        Ok(Box::new(MemoryWatch {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            version,
        }))
    }
}

struct MemoryWatch {
    inner: Arc<Mutex<Inner>>,
    key: String,
    version: u64,
}

#[async_trait]
impl WatchedKey for MemoryWatch {
    async fn hget(&mut self, field: &str) -> LimitsResult<Option<String>> {
        let mut inner = self.inner.lock();
        match inner.live(&self.key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(_) => Err(LimitsError::store(format!("wrong value type at {}", self.key))),
            None => Ok(None),
        }
    }

    async fn commit_hset(
        self: Box<Self>,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> LimitsResult<bool> {
        let mut inner = self.inner.lock();
        if inner.version_of(&self.key) != self.version {
            return Ok(false);
        }

        let mut fields = match inner.live(&self.key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => fields.clone(),
            Some(_) => return Err(LimitsError::store(format!("wrong value type at {}", self.key))),
            None => HashMap::new(),
        };
        fields.insert(field.to_string(), value.to_string());
        inner.put(&self.key, Value::Hash(fields), ttl);
        Ok(true)
    }

    async fn unwatch(self: Box<Self>) -> LimitsResult<()> {
        Ok(())
    }
}
