//! Integration tests for the read-through hash cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tenant_limits::{HashCache, LimitsError, MemoryStore};
use test_utils::fixtures::{isolated_config, SampleWallet};
use test_utils::mocks::{FaultyStore, StoreOp};

/// Caller-side error type, to check the cache stays generic over it.
#[derive(Debug, thiserror::Error)]
enum WalletError {
    #[error("wallet {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Limits(#[from] LimitsError),
}

fn cache() -> HashCache {
    HashCache::new(&isolated_config(), Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn cached_entity_survives_reader_changes() {
    let cache = cache();
    let original = SampleWallet::for_tenant("t1");
    let replacement = SampleWallet::for_tenant("t1");

    let first = cache
        .cached_read::<_, WalletError, _, _>("wallets", "w1", || {
            let wallet = original.clone();
            async move { Ok(wallet) }
        })
        .await
        .unwrap();
    let second = cache
        .cached_read::<_, WalletError, _, _>("wallets", "w1", || {
            let wallet = replacement.clone();
            async move { Ok(wallet) }
        })
        .await
        .unwrap();

    assert_eq!(first, original);
    assert_eq!(second, original);
}

#[tokio::test]
async fn reader_error_takes_precedence() {
    let cache = cache();

    let err = cache
        .cached_read::<SampleWallet, WalletError, _, _>("wallets", "missing", || async {
            Err(WalletError::NotFound("missing".to_string()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, WalletError::NotFound(id) if id == "missing"));
}

#[tokio::test]
async fn write_back_skipped_when_hash_changes_during_read() {
    let store = MemoryStore::new();
    let config = isolated_config();
    let cache = HashCache::new(&config, Arc::new(store.clone()));
    let other = HashCache::new(&config, Arc::new(store.clone()));
    let reads = AtomicUsize::new(0);
    let (reads_ref, other_ref) = (&reads, &other);

    let load = move || {
        reads_ref.fetch_add(1, Ordering::SeqCst);
        async move {
            // another writer fills a sibling field while this read is in flight
            other_ref
                .cached_read::<_, WalletError, _, _>("wallets", "w2", || async {
                    Ok(SampleWallet::for_tenant("t2"))
                })
                .await?;
            Ok::<_, WalletError>(SampleWallet::for_tenant("t1"))
        }
    };
    cache
        .cached_read::<_, WalletError, _, _>("wallets", "w1", load)
        .await
        .unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    // w1 was not cached, so the reader runs again
    let loaded_again = AtomicUsize::new(0);
    cache
        .cached_read::<_, WalletError, _, _>("wallets", "w1", || {
            loaded_again.fetch_add(1, Ordering::SeqCst);
            async { Ok(SampleWallet::for_tenant("t1")) }
        })
        .await
        .unwrap();
    assert_eq!(loaded_again.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_invalidates_every_field() {
    let cache = cache();
    let reads = AtomicUsize::new(0);
    let (reads_ref, cache_ref) = (&reads, &cache);
    let read = move |field: &'static str| async move {
        cache_ref
            .cached_read::<_, WalletError, _, _>("wallets", field, || {
                reads_ref.fetch_add(1, Ordering::SeqCst);
                async { Ok(SampleWallet::for_tenant("t1")) }
            })
            .await
            .unwrap()
    };

    read("w1").await;
    read("w2").await;
    read("w1").await;
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    cache.delete("wallets").await.unwrap();
    read("w1").await;
    read("w2").await;
    assert_eq!(reads.load(Ordering::SeqCst), 4);
}

fn faulty_cache(store: &FaultyStore) -> HashCache {
    HashCache::new(&isolated_config(), Arc::new(store.clone()))
}

#[tokio::test]
async fn reader_error_wins_over_store_failures() {
    for op in [StoreOp::Watch, StoreOp::HashGet, StoreOp::Commit] {
        let store = FaultyStore::default();
        store.fail(op);
        let cache = faulty_cache(&store);

        let err = cache
            .cached_read::<SampleWallet, WalletError, _, _>("wallets", "w1", || async {
                Err(WalletError::NotFound("w1".to_string()))
            })
            .await
            .unwrap_err();

        assert!(
            matches!(err, WalletError::NotFound(ref id) if id == "w1"),
            "{op:?}: got {err}"
        );
        assert!(store.inner().is_empty(), "{op:?}");
    }
}

#[tokio::test]
async fn reader_value_returned_when_store_fails() {
    for op in [StoreOp::Watch, StoreOp::HashGet, StoreOp::Commit] {
        let store = FaultyStore::default();
        store.fail(op);
        let cache = faulty_cache(&store);
        let wallet = SampleWallet::for_tenant("t1");

        let loaded = cache
            .cached_read::<_, WalletError, _, _>("wallets", "w1", || {
                let wallet = wallet.clone();
                async move { Ok(wallet) }
            })
            .await
            .unwrap();

        assert_eq!(loaded, wallet, "{op:?}");
        assert_eq!(store.failures(), 1, "{op:?}");
    }
}

#[tokio::test]
async fn failed_hash_read_falls_through_to_reader() {
    let store = FaultyStore::default();
    let cache = faulty_cache(&store);
    let calls = AtomicUsize::new(0);
    let read = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, WalletError>(7_u64) }
    };

    assert_eq!(cache.cached_read("numbers", "seven", read).await.unwrap(), 7);
    store.fail(StoreOp::HashGet);
    assert_eq!(cache.cached_read("numbers", "seven", read).await.unwrap(), 7);
    store.heal(StoreOp::HashGet);
    assert_eq!(cache.cached_read("numbers", "seven", read).await.unwrap(), 7);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
