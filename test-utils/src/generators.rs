//! Proptest generators for tenant-limits domain values.

use proptest::prelude::*;

/// Generate tenant identifiers.
pub fn tenant_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,15}"
}

/// Generate resource names.
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("assets".to_string()),
        Just("wallets".to_string()),
        Just("webhooks".to_string()),
        "[a-z]{3,12}",
    ]
}

/// Generate finite, non-negative limits.
pub fn finite_limit_strategy() -> impl Strategy<Value = i64> {
    0i64..50
}

/// Generate limits including the unlimited sentinel.
pub fn limit_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        1 => Just(tenant_limits::UNLIMITED),
        4 => finite_limit_strategy(),
    ]
}

/// A single operation against a count resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOp {
    /// Take one unit
    Consume,
    /// Give one unit back
    Return,
    /// Read the remaining units
    Available,
}

/// Generate count resource operations, weighted towards consumption.
pub fn count_op_strategy() -> impl Strategy<Value = CountOp> {
    prop_oneof![
        3 => Just(CountOp::Consume),
        2 => Just(CountOp::Return),
        1 => Just(CountOp::Available),
    ]
}

/// Generate sequences of count resource operations.
pub fn count_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<CountOp>> {
    prop::collection::vec(count_op_strategy(), 1..=max_len)
}

/// A single operation against a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOp {
    /// Increment by the given amount
    Incr(i64),
    /// Raise to at least the given value
    SetGreater(i64),
    /// Drop the stored value
    Delete,
}

/// Generate monotonic counter operations.
pub fn sequence_op_strategy() -> impl Strategy<Value = SequenceOp> {
    prop_oneof![
        4 => (0i64..10).prop_map(SequenceOp::Incr),
        2 => (0i64..200).prop_map(SequenceOp::SetGreater),
        1 => Just(SequenceOp::Delete),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_tenant_ids_are_key_safe(id in tenant_id_strategy()) {
            prop_assert!(!id.contains('/'));
            prop_assert!(!id.contains(':'));
            prop_assert!(id.len() >= 3);
        }

        #[test]
        fn test_limits_are_unlimited_or_non_negative(limit in limit_strategy()) {
            prop_assert!(limit == tenant_limits::UNLIMITED || limit >= 0);
        }

        #[test]
        fn test_op_sequences_non_empty(ops in count_ops_strategy(20)) {
            prop_assert!(!ops.is_empty() && ops.len() <= 20);
        }
    }
}
