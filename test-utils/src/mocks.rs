//! Mock implementations of the upstream collaborators and the store.
//!
//! Each mock counts its calls and can be switched into a failing mode, so
//! tests can assert both how often upstream was consulted and how the
//! component behaves when it is down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenant_limits::{
    CountRefresh, KeyValueStore, LimitsError, LimitsResult, MemoryStore, ResourceCounter,
    ResourceLimiter, WatchedKey,
};

/// Mock limiter returning one configurable limit for every tenant.
#[derive(Debug, Default)]
pub struct MockLimiter {
    limit: AtomicI64,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockLimiter {
    /// Create a limiter returning `limit`.
    #[must_use]
    pub fn new(limit: i64) -> Self {
        Self {
            limit: AtomicI64::new(limit),
            ..Self::default()
        }
    }

    /// Change the limit returned from now on.
    pub fn set_limit(&self, limit: i64) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceLimiter for MockLimiter {
    async fn limit(&self, resource: &str, tenant_id: &str) -> LimitsResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LimitsError::Limiter(format!(
                "mock limiter down for {resource}/{tenant_id}"
            )));
        }
        Ok(self.limit.load(Ordering::SeqCst))
    }
}

/// Mock counter reporting a configurable usage count.
#[derive(Debug, Default)]
pub struct MockCounter {
    count: AtomicI64,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockCounter {
    /// Create a counter reporting `count` units in use.
    #[must_use]
    pub fn new(count: i64) -> Self {
        Self {
            count: AtomicI64::new(count),
            ..Self::default()
        }
    }

    /// Change the reported usage.
    pub fn set_count(&self, count: i64) {
        self.count.store(count, Ordering::SeqCst);
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceCounter for MockCounter {
    async fn count(&self, tenant_id: &str) -> LimitsResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LimitsError::Counter(format!(
                "mock counter down for {tenant_id}"
            )));
        }
        Ok(self.count.load(Ordering::SeqCst))
    }
}

/// Mock refresh returning a configurable sequence value.
///
/// With a delay set, each call sleeps before answering, which widens the
/// window in which concurrent callers all see the counter missing.
#[derive(Debug, Default)]
pub struct MockRefresh {
    value: AtomicI64,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MockRefresh {
    /// Create a refresh returning `value`.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
            ..Self::default()
        }
    }

    /// Sleep for `delay` in every call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change the value returned from now on.
    pub fn set_value(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CountRefresh for MockRefresh {
    async fn refresh(&self, id: &str) -> LimitsResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LimitsError::Refresh(format!("mock refresh down for {id}")));
        }
        Ok(self.value.load(Ordering::SeqCst))
    }
}

/// Store operations that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// `get`
    Get,
    /// `set` and `set_nx`
    Set,
    /// `del`
    Del,
    /// `incr_existing`, `decr_existing` and `set_gt`
    Counter,
    /// `watch`
    Watch,
    /// `hget` on a watched key
    HashGet,
    /// `commit_hset` on a watched key
    Commit,
}

impl StoreOp {
    /// Every operation.
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Set,
        Self::Del,
        Self::Counter,
        Self::Watch,
        Self::HashGet,
        Self::Commit,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing: [AtomicBool; 7],
    failures: AtomicUsize,
}

impl Faults {
    fn check(&self, op: StoreOp) -> LimitsResult<()> {
        if self.failing[op.index()].load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(LimitsError::store(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

/// Store wrapping a [`MemoryStore`] whose operations can be made to fail
/// one by one, to exercise the degraded paths.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    /// Wrap `inner`; nothing fails until told to.
    #[must_use]
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// A store on which every operation fails.
    #[must_use]
    pub fn down() -> Self {
        let store = Self::default();
        for op in StoreOp::ALL {
            store.fail(op);
        }
        store
    }

    /// Make `op` fail from now on.
    pub fn fail(&self, op: StoreOp) {
        self.faults.failing[op.index()].store(true, Ordering::SeqCst);
    }

    /// Make `op` succeed again.
    pub fn heal(&self, op: StoreOp) {
        self.faults.failing[op.index()].store(false, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.faults.failures.load(Ordering::SeqCst)
    }

    /// The wrapped store, for inspecting what was written.
    #[must_use]
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> LimitsResult<Option<String>> {
        self.faults.check(StoreOp::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<()> {
        self.faults.check(StoreOp::Set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<bool> {
        self.faults.check(StoreOp::Set)?;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> LimitsResult<()> {
        self.faults.check(StoreOp::Del)?;
        self.inner.del(key).await
    }

    async fn incr_existing(
        &self,
        key: &str,
        delta: i64,
        ceiling: Option<i64>,
        ttl: Option<Duration>,
    ) -> LimitsResult<i64> {
        self.faults.check(StoreOp::Counter)?;
        self.inner.incr_existing(key, delta, ceiling, ttl).await
    }

    async fn decr_existing(&self, key: &str, delta: i64) -> LimitsResult<i64> {
        self.faults.check(StoreOp::Counter)?;
        self.inner.decr_existing(key, delta).await
    }

    async fn set_gt(&self, key: &str, candidate: i64, ttl: Option<Duration>) -> LimitsResult<i64> {
        self.faults.check(StoreOp::Counter)?;
        self.inner.set_gt(key, candidate, ttl).await
    }

    async fn watch(&self, key: &str) -> LimitsResult<Box<dyn WatchedKey>> {
        self.faults.check(StoreOp::Watch)?;
        let inner = self.inner.watch(key).await?;
        Ok(Box::new(FaultyWatch {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultyWatch {
    inner: Box<dyn WatchedKey>,
    faults: Arc<Faults>,
}

#[async_trait]
impl WatchedKey for FaultyWatch {
    async fn hget(&mut self, field: &str) -> LimitsResult<Option<String>> {
        self.faults.check(StoreOp::HashGet)?;
        self.inner.hget(field).await
    }

    async fn commit_hset(
        self: Box<Self>,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> LimitsResult<bool> {
        self.faults.check(StoreOp::Commit)?;
        self.inner.commit_hset(field, value, ttl).await
    }

    async fn unwatch(self: Box<Self>) -> LimitsResult<()> {
        self.inner.unwatch().await
    }
}
