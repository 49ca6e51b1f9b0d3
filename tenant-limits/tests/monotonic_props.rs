//! Property-based and concurrency tests for monotonic counters.
//!
//! Property 5: Sequences never move backward
//! Property 6: Concurrent increments on a missing counter apply exactly once

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tenant_limits::{MemoryStore, MonotonicCounter};
use test_utils::fixtures::isolated_config;
use test_utils::mocks::MockRefresh;
use test_utils::{sequence_op_strategy, tenant_id_strategy, SequenceOp};

fn counter(refresh: Arc<MockRefresh>) -> MonotonicCounter {
    MonotonicCounter::new(
        "nonce",
        &isolated_config(),
        Arc::new(MemoryStore::new()),
        refresh,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 5: Sequences never move backward
    ///
    /// Validates that:
    /// - increments add exactly `n` to the stored value
    /// - raises keep the larger of stored value and candidate
    /// - after a delete the next increment continues from upstream, which
    ///   has caught up with everything handed out
    #[test]
    fn prop_sequence_never_decreases(
        id in tenant_id_strategy(),
        start in 0i64..1000,
        ops in prop::collection::vec(sequence_op_strategy(), 1..50),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let refresh = Arc::new(MockRefresh::new(start));
            let counter = counter(refresh.clone());
            let mut upstream = start;
            let mut stored: Option<i64> = None;
            for op in ops {
                match op {
                    SequenceOp::Incr(n) => {
                        let value = counter.incr_n(&id, n).await.unwrap();
                        prop_assert_eq!(value, stored.unwrap_or(upstream) + n);
                        stored = Some(value);
                    }
                    SequenceOp::SetGreater(candidate) => {
                        let value = counter.set_gt(&id, candidate).await.unwrap();
                        let expected = stored.map_or(candidate, |current| current.max(candidate));
                        prop_assert_eq!(value, expected);
                        stored = Some(value);
                    }
                    SequenceOp::Delete => {
                        counter.del(&id).await.unwrap();
                        stored = None;
                    }
                }
                prop_assert_eq!(counter.current(&id).await.unwrap(), stored);
                if let Some(value) = stored {
                    upstream = upstream.max(value);
                    refresh.set_value(upstream);
                }
            }
            Ok(())
        })?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_increments_apply_exactly_once() {
    const CALLERS: i64 = 16;
    let refresh = Arc::new(MockRefresh::new(100).with_delay(Duration::from_millis(20)));
    let counter = Arc::new(counter(refresh.clone()));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move { counter.incr_n("wallet-1", 1).await })
        })
        .collect();

    let mut values = HashSet::new();
    for handle in handles {
        values.insert(handle.await.unwrap().unwrap());
    }

    let expected: HashSet<i64> = (101..=100 + CALLERS).collect();
    assert_eq!(values, expected);
    assert_eq!(counter.current("wallet-1").await.unwrap(), Some(100 + CALLERS));
    assert!(refresh.calls() >= 1);
}

#[tokio::test]
async fn refresh_failure_leaves_counter_missing() {
    let refresh = Arc::new(MockRefresh::new(5));
    refresh.set_failing(true);
    let counter = counter(refresh.clone());

    assert!(counter.incr_n("wallet-1", 1).await.is_err());
    assert_eq!(counter.current("wallet-1").await.unwrap(), None);

    refresh.set_failing(false);
    assert_eq!(counter.incr_n("wallet-1", 1).await.unwrap(), 6);
}
