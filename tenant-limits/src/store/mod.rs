//! Key-value store abstraction.
//!
//! Everything the limiters need from the backing store: plain reads and
//! writes, set-if-absent, atomic scripted counter operations, and
//! optimistic locking on hash keys.

use crate::error::LimitsResult;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Atomic counter operations executed server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Increment an existing key
    Incr,
    /// Decrement an existing key without going below zero
    Decr,
    /// Raise a key to a candidate value if it is absent or lower
    SetGreater,
}

impl CounterOp {
    /// Operation name understood by the counter script.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incr => "incr",
            Self::Decr => "decr",
            Self::SetGreater => "setgt",
        }
    }
}

/// Backing store used by resources, counters and the hash cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> LimitsResult<Option<String>>;

    /// Write a value, replacing any existing one.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<()>;

    /// Write a value only if the key is absent. Returns true if written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<bool>;

    /// Delete a key of any type.
    async fn del(&self, key: &str) -> LimitsResult<()>;

    /// Atomically add `delta` to an existing integer key.
    ///
    /// Fails with `NotFound` when the key is absent and `InvalidArgument`
    /// when `delta` is negative. The result is clamped to `ceiling` when one
    /// is given, and the expiry is reset to `ttl` when one is given.
    async fn incr_existing(
        &self,
        key: &str,
        delta: i64,
        ceiling: Option<i64>,
        ttl: Option<Duration>,
    ) -> LimitsResult<i64>;

    /// Atomically subtract `delta` from an existing integer key.
    ///
    /// Fails with `NotFound` when the key is absent, `Underflow` when the
    /// result would be negative (the value is left unchanged) and
    /// `InvalidArgument` when `delta` is negative.
    async fn decr_existing(&self, key: &str, delta: i64) -> LimitsResult<i64>;

    /// Atomically raise a key to `candidate` if it is absent or lower.
    /// Returns the resulting value.
    async fn set_gt(&self, key: &str, candidate: i64, ttl: Option<Duration>) -> LimitsResult<i64>;

    /// Start watching a hash key for optimistic updates.
    async fn watch(&self, key: &str) -> LimitsResult<Box<dyn WatchedKey>>;
}

/// A hash key under optimistic lock.
#[async_trait]
pub trait WatchedKey: Send {
    /// Read a field of the watched hash.
    async fn hget(&mut self, field: &str) -> LimitsResult<Option<String>>;

    /// Write a field and set the hash expiry, but only if the key has not
    /// changed since it was watched. Returns false on conflict.
    async fn commit_hset(
        self: Box<Self>,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> LimitsResult<bool>;

    /// Release the watch without writing.
    async fn unwatch(self: Box<Self>) -> LimitsResult<()>;
}

/// Parse a stored counter value.
pub(crate) fn parse_count(key: &str, raw: &str) -> LimitsResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| crate::error::LimitsError::store(format!("non-integer value at {key}: {raw}")))
}
