//! Store key layout.
//!
//! Key formats are shared with existing deployments and must not change.

/// Builds namespaced store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    /// Create a layout for the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Get the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Remaining-units counter of a tenant's resource.
    #[must_use]
    pub fn count_key(&self, tenant_id: &str, resource: &str) -> String {
        format!("{}/limits/{tenant_id}/{resource}/count", self.namespace)
    }

    /// Cached upstream limit of a tenant's resource.
    #[must_use]
    pub fn limit_key(&self, tenant_id: &str, resource: &str) -> String {
        format!("{}/limits/{tenant_id}/{resource}/limit", self.namespace)
    }

    /// Monotonic counter for a tenant or wallet.
    #[must_use]
    pub fn counter_key(&self, name: &str, id: &str) -> String {
        format!("{}/counters/{name}/{id}/count", self.namespace)
    }

    /// Hash holding cached entities of one kind.
    #[must_use]
    pub fn hash_key(&self, name: &str) -> String {
        format!("{}:{name}", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        let keys = KeyLayout::new("svc");
        assert_eq!(keys.count_key("t1", "assets"), "svc/limits/t1/assets/count");
        assert_eq!(keys.limit_key("t1", "assets"), "svc/limits/t1/assets/limit");
        assert_eq!(keys.counter_key("nonce", "0xabc"), "svc/counters/nonce/0xabc/count");
        assert_eq!(keys.hash_key("wallets"), "svc:wallets");
    }

    #[test]
    fn test_namespace_isolation() {
        let a = KeyLayout::new("a");
        let b = KeyLayout::new("b");
        assert_ne!(a.count_key("t", "r"), b.count_key("t", "r"));
    }
}
