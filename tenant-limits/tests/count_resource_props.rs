//! Property-based tests for count resources.
//!
//! Property 1: Remaining units stay within 0..=limit
//! Property 2: Remaining units track limit minus usage
//! Property 3: Unlimited tenants never touch the counter
//! Property 4: A tenant is limited exactly when its limit is finite

use proptest::prelude::*;
use std::sync::Arc;
use tenant_limits::{CountResource, MemoryStore, UNLIMITED};
use test_utils::fixtures::isolated_config;
use test_utils::mocks::{MockCounter, MockLimiter};
use test_utils::{
    count_ops_strategy, finite_limit_strategy, limit_strategy, resource_name_strategy,
    tenant_id_strategy, CountOp,
};

fn resource(limit: i64, used: i64) -> (CountResource, Arc<MockCounter>, MemoryStore) {
    named_resource("assets", limit, used)
}

fn named_resource(
    name: &str,
    limit: i64,
    used: i64,
) -> (CountResource, Arc<MockCounter>, MemoryStore) {
    let store = MemoryStore::new();
    let counter = Arc::new(MockCounter::new(used));
    let resource = CountResource::new(
        name,
        &isolated_config(),
        Arc::new(store.clone()),
        Arc::new(MockLimiter::new(limit)),
        counter.clone(),
    );
    (resource, counter, store)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Remaining units stay within 0..=limit
    ///
    /// Whatever the usage count says and however consumes and returns
    /// interleave, the reported remainder is never negative and never
    /// above the limit.
    #[test]
    fn prop_available_within_bounds(
        name in resource_name_strategy(),
        tenant in tenant_id_strategy(),
        limit in finite_limit_strategy(),
        used in 0i64..80,
        ops in count_ops_strategy(40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resource, _, _) = named_resource(&name, limit, used);
            for op in ops {
                match op {
                    CountOp::Consume => resource.consume(&tenant).await.unwrap(),
                    CountOp::Return => resource.return_unit(&tenant).await.unwrap(),
                    CountOp::Available => {}
                }
                let available = resource.available(&tenant).await.unwrap();
                prop_assert!((0..=limit).contains(&available), "available {} outside 0..={}", available, limit);
            }
            Ok(())
        })?;
    }

    /// Property 2: Remaining units track limit minus usage
    ///
    /// When callers only consume while units remain and the usage count
    /// follows their creations and deletions, the counter equals
    /// `limit - used` after every step.
    #[test]
    fn prop_available_tracks_usage(
        tenant in tenant_id_strategy(),
        limit in 1i64..30,
        ops in count_ops_strategy(60),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resource, counter, _) = resource(limit, 0);
            let mut used = 0;
            for op in ops {
                match op {
                    CountOp::Consume => {
                        if resource.available(&tenant).await.unwrap() > 0 {
                            resource.consume(&tenant).await.unwrap();
                            used += 1;
                            counter.set_count(used);
                        }
                    }
                    CountOp::Return => {
                        if used > 0 {
                            used -= 1;
                            counter.set_count(used);
                            resource.return_unit(&tenant).await.unwrap();
                        }
                    }
                    CountOp::Available => {}
                }
                prop_assert_eq!(resource.available(&tenant).await.unwrap(), limit - used);
            }
            Ok(())
        })?;
    }

    /// Property 3: Unlimited tenants never touch the counter
    #[test]
    fn prop_unlimited_bypasses_counter(
        tenant in tenant_id_strategy(),
        ops in count_ops_strategy(20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resource, counter, store) = resource(UNLIMITED, 0);
            for op in ops {
                match op {
                    CountOp::Consume => resource.consume(&tenant).await.unwrap(),
                    CountOp::Return => resource.return_unit(&tenant).await.unwrap(),
                    CountOp::Available => {
                        prop_assert_eq!(resource.available(&tenant).await.unwrap(), UNLIMITED);
                    }
                }
            }
            prop_assert!(!resource.limited(&tenant).await);
            prop_assert_eq!(counter.calls(), 0);
            // only the cached limit is stored
            prop_assert!(store.len() <= 1);
            Ok(())
        })?;
    }

    /// Property 4: A tenant is limited exactly when its limit is finite
    #[test]
    fn prop_limited_matches_limit(
        tenant in tenant_id_strategy(),
        limit in limit_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resource, _, _) = resource(limit, 0);
            prop_assert_eq!(resource.limited(&tenant).await, limit != UNLIMITED);
            prop_assert_eq!(resource.get_limit(&tenant).await.unwrap(), limit);
            Ok(())
        })?;
    }
}
