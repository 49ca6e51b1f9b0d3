//! Strictly increasing per-key sequences (e.g. transaction nonces).
//!
//! The counter lives in the store with a reset period. While it exists,
//! increments are a single atomic script call. When it is absent (expired,
//! deleted, never created) the first caller fetches the authoritative value
//! upstream and claims the key with set-if-absent; callers that lose that
//! race apply their increment to the winner's value. Every caller's
//! increment is applied exactly once.

use crate::collaborators::CountRefresh;
use crate::config::LimitsConfig;
use crate::error::{LimitsError, LimitsResult};
use crate::keys::KeyLayout;
use crate::metrics::LimitsMetrics;
use crate::store::{parse_count, KeyValueStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, Span};

/// A named family of monotonic counters, one per tenant or wallet.
pub struct MonotonicCounter {
    name: String,
    store: Arc<dyn KeyValueStore>,
    refresh: Arc<dyn CountRefresh>,
    keys: KeyLayout,
    reset_period: Duration,
    metrics: Arc<LimitsMetrics>,
    span: Span,
}

impl MonotonicCounter {
    /// Create a counter family.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: &LimitsConfig,
        store: Arc<dyn KeyValueStore>,
        refresh: Arc<dyn CountRefresh>,
    ) -> Self {
        let name = name.into();
        Self {
            span: tracing::info_span!("monotonic_counter", counter = %name),
            name,
            store,
            refresh,
            keys: KeyLayout::new(config.namespace.clone()),
            reset_period: config.reset_period,
            metrics: Arc::new(LimitsMetrics::unregistered()),
        }
    }

    /// Report to the given metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimitsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log under the given span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get the counter family name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `n` to the counter and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a negative `n` or one that would
    /// overflow the counter, the refresh
    /// collaborator's error when the counter must be re-created, and
    /// `NotFound` if the counter vanished again between claim and increment.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn incr_n(&self, id: &str, n: i64) -> LimitsResult<i64> {
        if n < 0 {
            return Err(LimitsError::invalid_argument(format!(
                "negative increment {n} for {}/{id}",
                self.name
            )));
        }

        let key = self.keys.counter_key(&self.name, id);
        match self.increment(&key, n).await {
            Ok(value) => {
                self.metrics.record_monotonic_claim(&self.name, "hit");
                return Ok(value);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let current = self.refresh.refresh(id).await?;
        let total = current.checked_add(n).ok_or_else(|| {
            LimitsError::invalid_argument(format!(
                "increment {n} overflows {}/{id} at {current}",
                self.name
            ))
        })?;
        if self
            .store
            .set_nx(&key, &total.to_string(), Some(self.reset_period))
            .await?
        {
            self.metrics.record_monotonic_claim(&self.name, "won");
            debug!(current, total, "counter claimed");
            return Ok(total);
        }

        self.metrics.record_monotonic_claim(&self.name, "lost");
        debug!("lost claim race, incrementing winner's value");
        self.increment(&key, n).await
    }

    /// Raise the counter to `candidate` unless it is already at least that.
    /// Creates the counter when absent. Returns the resulting value.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn set_gt(&self, id: &str, candidate: i64) -> LimitsResult<i64> {
        let key = self.keys.counter_key(&self.name, id);
        self.store
            .set_gt(&key, candidate, Some(self.reset_period))
            .await
    }

    /// Delete the counter so the next increment re-reads upstream.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn del(&self, id: &str) -> LimitsResult<()> {
        let key = self.keys.counter_key(&self.name, id);
        self.store.del(&key).await
    }

    /// Current value without incrementing, if the counter exists.
    ///
    /// # Errors
    ///
    /// Returns a store error or a parse error for a corrupt value.
    pub async fn current(&self, id: &str) -> LimitsResult<Option<i64>> {
        let key = self.keys.counter_key(&self.name, id);
        self.store
            .get(&key)
            .await?
            .map(|raw| parse_count(&key, &raw))
            .transpose()
    }

    async fn increment(&self, key: &str, n: i64) -> LimitsResult<i64> {
        self.store
            .incr_existing(key, n, None, Some(self.reset_period))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct StubRefresh {
        value: AtomicI64,
        calls: AtomicUsize,
    }

    impl StubRefresh {
        fn new(value: i64) -> Arc<Self> {
            Arc::new(Self {
                value: AtomicI64::new(value),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CountRefresh for StubRefresh {
        async fn refresh(&self, _id: &str) -> LimitsResult<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.load(Ordering::SeqCst))
        }
    }

    struct FailingRefresh;

    #[async_trait]
    impl CountRefresh for FailingRefresh {
        async fn refresh(&self, _id: &str) -> LimitsResult<i64> {
            Err(LimitsError::Refresh("chain node unreachable".to_string()))
        }
    }

    fn counter(refresh: Arc<dyn CountRefresh>) -> (MonotonicCounter, MemoryStore) {
        let store = MemoryStore::new();
        let counter = MonotonicCounter::new(
            "nonce",
            &LimitsConfig::default(),
            Arc::new(store.clone()),
            refresh,
        );
        (counter, store)
    }

    #[tokio::test]
    async fn test_first_increment_claims_from_refresh() {
        let refresh = StubRefresh::new(41);
        let (counter, store) = counter(refresh.clone());

        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 42);
        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 43);
        assert_eq!(counter.incr_n("w1", 3).await.unwrap(), 46);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);

        let ttl = store.ttl("limits/counters/nonce/w1/count").unwrap();
        assert!(ttl > Duration::from_secs(25) && ttl <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_negative_increment_rejected() {
        let (counter, _) = counter(StubRefresh::new(0));
        let err = counter.incr_n("w1", -1).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_overflowing_increment_rejected() {
        let refresh = StubRefresh::new(1);
        let (counter, _) = counter(refresh.clone());

        let err = counter.incr_n("w1", i64::MAX).await.unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(counter.current("w1").await.unwrap(), None);

        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 2);
        let err = counter.incr_n("w1", i64::MAX).await.unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(counter.current("w1").await.unwrap(), Some(2));
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_increment_reads_through() {
        let (counter, _) = counter(StubRefresh::new(9));
        assert_eq!(counter.incr_n("w1", 0).await.unwrap(), 9);
        assert_eq!(counter.current("w1").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_refresh_error_propagates() {
        let (counter, store) = counter(Arc::new(FailingRefresh));
        let err = counter.incr_n("w1", 1).await.unwrap_err();
        assert!(matches!(err, LimitsError::Refresh(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_del_forces_refresh() {
        let refresh = StubRefresh::new(10);
        let (counter, _) = counter(refresh.clone());

        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 11);
        refresh.value.store(20, Ordering::SeqCst);
        counter.del("w1").await.unwrap();
        assert_eq!(counter.current("w1").await.unwrap(), None);

        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 21);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_gt_never_moves_backward() {
        let (counter, _) = counter(StubRefresh::new(0));

        assert_eq!(counter.set_gt("w1", 5).await.unwrap(), 5);
        assert_eq!(counter.set_gt("w1", 3).await.unwrap(), 5);
        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 6);
        assert_eq!(counter.set_gt("w1", 10).await.unwrap(), 10);
        assert_eq!(counter.current("w1").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_counters_are_per_id() {
        let (counter, _) = counter(StubRefresh::new(0));
        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 1);
        assert_eq!(counter.incr_n("w2", 5).await.unwrap(), 5);
        assert_eq!(counter.incr_n("w1", 1).await.unwrap(), 2);
    }
}
