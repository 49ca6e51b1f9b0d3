//! Per-tenant resource limits.
//!
//! The authoritative limit lives behind an upstream limiter that is costly
//! to call. `Resource` caches it in the store (with a long TTL) and keeps
//! per-tenant bookkeeping in process to decide when to re-poll upstream.

use crate::collaborators::ResourceLimiter;
use crate::config::{LimiterFailurePolicy, LimitsConfig};
use crate::error::LimitsResult;
use crate::keys::KeyLayout;
use crate::metrics::LimitsMetrics;
use crate::store::{parse_count, KeyValueStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn, Span};

/// Limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// In-process refresh bookkeeping for one tenant. Lost on restart.
#[derive(Debug, Clone, Default)]
struct TenantLimit {
    last_refresh: Option<Instant>,
    calls_since_refresh: u64,
    last_known_limit: Option<i64>,
}

/// Cached, periodically refreshed limit of one resource across tenants.
pub struct Resource {
    name: String,
    store: Arc<dyn KeyValueStore>,
    limiter: Arc<dyn ResourceLimiter>,
    keys: KeyLayout,
    limit_ttl: Duration,
    refresh_ttl: Duration,
    refresh_count: u64,
    failure_policy: LimiterFailurePolicy,
    tenants: Mutex<HashMap<String, TenantLimit>>,
    metrics: Arc<LimitsMetrics>,
    span: Span,
}

impl Resource {
    /// Create a resource tracker.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: &LimitsConfig,
        store: Arc<dyn KeyValueStore>,
        limiter: Arc<dyn ResourceLimiter>,
    ) -> Self {
        let name = name.into();
        Self {
            span: tracing::info_span!("resource", resource = %name),
            name,
            store,
            limiter,
            keys: KeyLayout::new(config.namespace.clone()),
            limit_ttl: config.limit_ttl,
            refresh_ttl: config.refresh_ttl,
            refresh_count: config.refresh_count,
            failure_policy: config.failure_policy,
            tenants: Mutex::new(HashMap::new()),
            metrics: Arc::new(LimitsMetrics::unregistered()),
        }
    }

    /// Report to the given metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimitsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log under the given span instead of a fresh one.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub(crate) const fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    pub(crate) const fn metrics(&self) -> &Arc<LimitsMetrics> {
        &self.metrics
    }

    pub(crate) const fn span(&self) -> &Span {
        &self.span
    }

    /// Get the tenant's limit, from the store if cached, else from upstream.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store has no usable value and the
    /// upstream limiter fails.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn get_limit(&self, tenant_id: &str) -> LimitsResult<i64> {
        match self.cached_limit(tenant_id).await {
            Some(limit) => {
                self.remember(tenant_id, limit, false);
                Ok(limit)
            }
            None => self.refresh_limit(tenant_id).await,
        }
    }

    /// Fetch the tenant's limit from upstream and cache it.
    ///
    /// Writing the cache is best effort.
    ///
    /// # Errors
    ///
    /// Returns the upstream limiter's error.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn refresh_limit(&self, tenant_id: &str) -> LimitsResult<i64> {
        let limit = match self.limiter.limit(&self.name, tenant_id).await {
            Ok(limit) => limit,
            Err(e) => {
                self.metrics.record_limit_refresh(&self.name, false);
                return Err(e);
            }
        };
        self.metrics.record_limit_refresh(&self.name, true);
        self.remember(tenant_id, limit, true);

        let key = self.keys.limit_key(tenant_id, &self.name);
        if let Err(e) = self
            .store
            .set(&key, &limit.to_string(), Some(self.limit_ttl))
            .await
        {
            warn!(error = %e, key = %key, "failed to cache limit");
        }

        debug!(limit, "limit refreshed");
        Ok(limit)
    }

    /// Check whether the tenant is limited at all.
    ///
    /// Re-polls upstream when the tenant's limit is stale by time or by
    /// number of checks, otherwise trusts the cached limit. When upstream
    /// fails the configured failure policy decides.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn limited(&self, tenant_id: &str) -> bool {
        let result = if self.needs_refresh(tenant_id) {
            self.refresh_limit(tenant_id).await
        } else {
            self.get_limit(tenant_id).await
        };

        let limit = match result {
            Ok(limit) => limit,
            Err(e) => {
                let fallback = self.fallback_limit(tenant_id).await;
                warn!(
                    error = %e,
                    policy = self.failure_policy.as_str(),
                    fallback,
                    "limiter unavailable"
                );
                fallback
            }
        };

        limit >= 0
    }

    /// Read the store-cached limit. Read failures count as a miss.
    async fn cached_limit(&self, tenant_id: &str) -> Option<i64> {
        let key = self.keys.limit_key(tenant_id, &self.name);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match parse_count(&key, &raw) {
                Ok(limit) => Some(limit),
                Err(e) => {
                    warn!(error = %e, "ignoring cached limit");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, key = %key, "failed to read cached limit");
                None
            }
        }
    }

    /// Count this check and decide whether the tenant's limit is stale.
    fn needs_refresh(&self, tenant_id: &str) -> bool {
        let mut tenants = self.tenants.lock();
        let state = tenants.entry(tenant_id.to_string()).or_default();
        state.calls_since_refresh += 1;
        state.last_refresh.is_none_or(|at| {
            at.elapsed() >= self.refresh_ttl || state.calls_since_refresh > self.refresh_count
        })
    }

    fn remember(&self, tenant_id: &str, limit: i64, refreshed: bool) {
        let mut tenants = self.tenants.lock();
        let state = tenants.entry(tenant_id.to_string()).or_default();
        state.last_known_limit = Some(limit);
        if refreshed {
            state.last_refresh = Some(Instant::now());
            state.calls_since_refresh = 0;
        }
    }

    async fn fallback_limit(&self, tenant_id: &str) -> i64 {
        match self.failure_policy {
            LimiterFailurePolicy::FailOpen => UNLIMITED,
            LimiterFailurePolicy::FailClosed => 0,
            LimiterFailurePolicy::FailOpenToLastKnownLimit => {
                let known = self
                    .tenants
                    .lock()
                    .get(tenant_id)
                    .and_then(|state| state.last_known_limit);
                match known {
                    Some(limit) => limit,
                    None => self.cached_limit(tenant_id).await.unwrap_or(UNLIMITED),
                }
            }
        }
    }
}
