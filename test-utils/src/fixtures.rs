//! Test fixtures with sample data.

use serde::{Deserialize, Serialize};
use tenant_limits::LimitsConfig;

/// Configuration with a unique namespace, so tests sharing a store never
/// see each other's keys.
#[must_use]
pub fn isolated_config() -> LimitsConfig {
    LimitsConfig::default().with_namespace(format!("test-{}", uuid::Uuid::new_v4()))
}

/// Sample cached entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleWallet {
    /// Wallet address
    pub address: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Chain the wallet lives on
    pub chain: String,
}

impl SampleWallet {
    /// Create a sample wallet for `tenant_id`.
    #[must_use]
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self {
            address: format!("0x{}", uuid::Uuid::new_v4().simple()),
            tenant_id: tenant_id.to_string(),
            chain: "ethereum".to_string(),
        }
    }
}
