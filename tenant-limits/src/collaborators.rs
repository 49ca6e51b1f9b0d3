//! Upstream collaborators supplied by the calling service.
//!
//! Each is a single-method capability so tests can mock exactly what a
//! component needs.

use crate::error::LimitsResult;
use async_trait::async_trait;

/// Fetches the authoritative limit of a resource for a tenant.
///
/// A limit of `-1` means unlimited.
#[async_trait]
pub trait ResourceLimiter: Send + Sync {
    /// Get the current limit.
    async fn limit(&self, resource: &str, tenant_id: &str) -> LimitsResult<i64>;
}

/// Counts the units a tenant actually uses right now.
#[async_trait]
pub trait ResourceCounter: Send + Sync {
    /// Get the current usage count.
    async fn count(&self, tenant_id: &str) -> LimitsResult<i64>;
}

/// Fetches the authoritative current value of a monotonic sequence.
#[async_trait]
pub trait CountRefresh: Send + Sync {
    /// Get the current sequence value for the tenant or wallet.
    async fn refresh(&self, id: &str) -> LimitsResult<i64>;
}
