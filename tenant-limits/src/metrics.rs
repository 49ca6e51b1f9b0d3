//! Prometheus metrics for limit and counter operations.
//!
//! Metrics are registered into a caller-supplied registry; nothing is
//! registered globally.

use crate::error::LimitsResult;
use prometheus::{IntCounterVec, Opts, Registry};

const NAMESPACE: &str = "limits";

/// Limits subsystem metrics.
#[derive(Debug, Clone)]
pub struct LimitsMetrics {
    /// Store operations by operation and status
    pub store_operations: IntCounterVec,
    /// Upstream limit refreshes by resource and status
    pub limit_refreshes: IntCounterVec,
    /// Counter recomputations from the authoritative count
    pub counter_reinitialisations: IntCounterVec,
    /// Monotonic counter increments by outcome (hit, won, lost)
    pub monotonic_claims: IntCounterVec,
    /// Hash cache reads by outcome (hit, miss, conflict)
    pub hash_cache_reads: IntCounterVec,
}

impl LimitsMetrics {
    /// Create metrics and register them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns a metrics error if a metric with the same name is already
    /// registered.
    pub fn new(registry: &Registry) -> LimitsResult<Self> {
        let metrics = Self::build()?;
        registry.register(Box::new(metrics.store_operations.clone()))?;
        registry.register(Box::new(metrics.limit_refreshes.clone()))?;
        registry.register(Box::new(metrics.counter_reinitialisations.clone()))?;
        registry.register(Box::new(metrics.monotonic_claims.clone()))?;
        registry.register(Box::new(metrics.hash_cache_reads.clone()))?;
        Ok(metrics)
    }

    /// Create metrics that are not exported anywhere.
    #[must_use]
    pub fn unregistered() -> Self {
        // Metric names and label sets are static, so construction cannot fail.
        #[allow(clippy::expect_used)]
        Self::build().expect("static metric definitions are valid")
    }

    fn build() -> Result<Self, prometheus::Error> {
        Ok(Self {
            store_operations: IntCounterVec::new(
                Opts::new("store_operations_total", "Total store operations").namespace(NAMESPACE),
                &["operation", "status"],
            )?,
            limit_refreshes: IntCounterVec::new(
                Opts::new("limit_refreshes_total", "Total upstream limit refreshes")
                    .namespace(NAMESPACE),
                &["resource", "status"],
            )?,
            counter_reinitialisations: IntCounterVec::new(
                Opts::new(
                    "counter_reinitialisations_total",
                    "Total counter recomputations from the authoritative count",
                )
                .namespace(NAMESPACE),
                &["resource"],
            )?,
            monotonic_claims: IntCounterVec::new(
                Opts::new("monotonic_claims_total", "Total monotonic counter increments")
                    .namespace(NAMESPACE),
                &["counter", "outcome"],
            )?,
            hash_cache_reads: IntCounterVec::new(
                Opts::new("hash_cache_reads_total", "Total hash cache reads").namespace(NAMESPACE),
                &["cache", "outcome"],
            )?,
        })
    }

    /// Record a store operation.
    pub fn record_store_operation(&self, operation: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.store_operations
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record an upstream limit refresh.
    pub fn record_limit_refresh(&self, resource: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.limit_refreshes
            .with_label_values(&[resource, status])
            .inc();
    }

    /// Record a counter recomputation.
    pub fn record_reinitialisation(&self, resource: &str) {
        self.counter_reinitialisations
            .with_label_values(&[resource])
            .inc();
    }

    /// Record a monotonic counter increment.
    pub fn record_monotonic_claim(&self, counter: &str, outcome: &str) {
        self.monotonic_claims
            .with_label_values(&[counter, outcome])
            .inc();
    }

    /// Record a hash cache read.
    pub fn record_hash_cache_read(&self, cache: &str, outcome: &str) {
        self.hash_cache_reads
            .with_label_values(&[cache, outcome])
            .inc();
    }
}

impl Default for LimitsMetrics {
    fn default() -> Self {
        Self::unregistered()
    }
}
