//! Remaining-units quota per tenant.
//!
//! A counter seeded with `limit - actual usage` is decremented on consume
//! and incremented on return. Whenever the counter is missing or an
//! atomic update is refused, it is recomputed from the authoritative usage
//! count, so the cache can drift or vanish without the quota drifting.

use crate::collaborators::{ResourceCounter, ResourceLimiter};
use crate::config::LimitsConfig;
use crate::error::LimitsResult;
use crate::metrics::LimitsMetrics;
use crate::resource::{Resource, UNLIMITED};
use crate::store::{parse_count, KeyValueStore};
use std::sync::Arc;
use tracing::{debug, instrument, warn, Span};

/// Decrementing quota counter built on a [`Resource`] limit.
pub struct CountResource {
    resource: Resource,
    counter: Arc<dyn ResourceCounter>,
}

impl CountResource {
    /// Create a count resource.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: &LimitsConfig,
        store: Arc<dyn KeyValueStore>,
        limiter: Arc<dyn ResourceLimiter>,
        counter: Arc<dyn ResourceCounter>,
    ) -> Self {
        Self {
            resource: Resource::new(name, config, store, limiter),
            counter,
        }
    }

    /// Report to the given metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimitsMetrics>) -> Self {
        self.resource = self.resource.with_metrics(metrics);
        self
    }

    /// Log under the given span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.resource = self.resource.with_span(span);
        self
    }

    /// The underlying limit tracker.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Get the tenant's limit.
    ///
    /// # Errors
    ///
    /// See [`Resource::get_limit`].
    pub async fn get_limit(&self, tenant_id: &str) -> LimitsResult<i64> {
        self.resource.get_limit(tenant_id).await
    }

    /// Check whether the tenant is limited at all.
    pub async fn limited(&self, tenant_id: &str) -> bool {
        self.resource.limited(tenant_id).await
    }

    /// Use one unit of the tenant's quota.
    ///
    /// Unlimited and zero limits skip the counter. A refused decrement
    /// (missing counter or no units left) recomputes the counter instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the limit cannot be determined, the store reports
    /// a protocol error, or recomputation fails.
    #[instrument(parent = self.resource.span(), skip(self))]
    pub async fn consume(&self, tenant_id: &str) -> LimitsResult<()> {
        let limit = self.get_limit(tenant_id).await?;
        if limit <= 0 {
            return Ok(());
        }

        let key = self.count_key(tenant_id);
        match self.store().decr_existing(&key, 1).await {
            Ok(remaining) => {
                debug!(remaining, "unit consumed");
                Ok(())
            }
            Err(e) if e.is_protocol_error() => Err(e),
            Err(e) => {
                debug!(error = %e, "decrement refused, recomputing");
                self.initialise(tenant_id, limit).await.map(|_| ())
            }
        }
    }

    /// Give one unit back to the tenant's quota.
    ///
    /// The counter never rises above the limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the limit cannot be determined, the store reports
    /// a protocol error, or recomputation fails.
    #[instrument(parent = self.resource.span(), skip(self))]
    pub async fn return_unit(&self, tenant_id: &str) -> LimitsResult<()> {
        let limit = self.get_limit(tenant_id).await?;
        if limit < 0 {
            return Ok(());
        }

        let key = self.count_key(tenant_id);
        match self
            .store()
            .incr_existing(&key, 1, Some(limit), None)
            .await
        {
            Ok(remaining) => {
                debug!(remaining, "unit returned");
                Ok(())
            }
            Err(e) if e.is_protocol_error() => Err(e),
            Err(e) => {
                debug!(error = %e, "increment refused, recomputing");
                self.initialise(tenant_id, limit).await.map(|_| ())
            }
        }
    }

    /// Units the tenant has left, or [`UNLIMITED`].
    ///
    /// A zero reading re-polls the upstream limit first, in case the
    /// tenant's cap was raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the limit or the usage count cannot be fetched.
    #[instrument(parent = self.resource.span(), skip(self))]
    pub async fn available(&self, tenant_id: &str) -> LimitsResult<i64> {
        let remaining = match self.cached_count(tenant_id).await {
            Some(remaining) => remaining,
            None => {
                let limit = self.get_limit(tenant_id).await?;
                if limit < 0 {
                    return Ok(UNLIMITED);
                }
                self.initialise(tenant_id, limit).await?
            }
        };

        if remaining != 0 {
            return Ok(remaining);
        }

        let limit = self.resource.refresh_limit(tenant_id).await?;
        if limit < 0 {
            return Ok(UNLIMITED);
        }
        self.initialise(tenant_id, limit).await
    }

    /// Units left from the cache alone, falling back to [`Self::available`]
    /// on a miss, an error or a zero reading.
    ///
    /// # Errors
    ///
    /// See [`Self::available`].
    pub async fn read_only_available(&self, tenant_id: &str) -> LimitsResult<i64> {
        match self.cached_count(tenant_id).await {
            Some(remaining) if remaining != 0 => Ok(remaining),
            _ => self.available(tenant_id).await,
        }
    }

    /// Recompute the counter as `max(0, limit - usage)` and write it.
    ///
    /// The write is a plain overwrite; concurrent recomputations converge
    /// because each derives from the authoritative usage count. A failed
    /// write is logged and the computed value still returned.
    pub(crate) async fn initialise(&self, tenant_id: &str, limit: i64) -> LimitsResult<i64> {
        let used = self.counter.count(tenant_id).await?;
        let remaining = (limit - used).max(0);
        self.resource.metrics().record_reinitialisation(self.resource.name());

        let key = self.count_key(tenant_id);
        if let Err(e) = self.store().set(&key, &remaining.to_string(), None).await {
            warn!(parent: self.resource.span(), error = %e, key = %key, "failed to write counter");
        }

        debug!(parent: self.resource.span(), tenant_id, limit, used, remaining, "counter initialised");
        Ok(remaining)
    }

    async fn cached_count(&self, tenant_id: &str) -> Option<i64> {
        let key = self.count_key(tenant_id);
        match self.store().get(&key).await {
            Ok(Some(raw)) => parse_count(&key, &raw)
                .inspect_err(|e| warn!(parent: self.resource.span(), error = %e, "ignoring counter"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(parent: self.resource.span(), error = %e, key = %key, "failed to read counter");
                None
            }
        }
    }

    fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.resource.store()
    }

    fn count_key(&self, tenant_id: &str) -> String {
        self.resource
            .keys()
            .count_key(tenant_id, self.resource.name())
    }
}
