//! Read-through cache of JSON entities in store hashes.
//!
//! Entities of one kind share a hash (`{namespace}:{name}`), one field per
//! entity. Writes are optimistic: the hash is watched before the read and
//! the write-back is dropped if anyone touched the hash in between.

use crate::config::LimitsConfig;
use crate::error::LimitsError;
use crate::keys::KeyLayout;
use crate::metrics::LimitsMetrics;
use crate::store::{KeyValueStore, WatchedKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn, Span};

/// Read-through hash cache.
///
/// Each read holds a watch for its whole duration. On Redis a watch needs
/// its own connection; the store reuses a few idle ones and opens a new
/// connection when all are busy, so many concurrent cold reads cost one
/// connection each.
pub struct HashCache {
    store: Arc<dyn KeyValueStore>,
    keys: KeyLayout,
    ttl: Duration,
    metrics: Arc<LimitsMetrics>,
    span: Span,
}

impl HashCache {
    /// Create a hash cache.
    #[must_use]
    pub fn new(config: &LimitsConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            keys: KeyLayout::new(config.namespace.clone()),
            ttl: config.cache_ttl,
            metrics: Arc::new(LimitsMetrics::unregistered()),
            span: tracing::info_span!("hash_cache"),
        }
    }

    /// Report to the given metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimitsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log under the given span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Return the cached entity, or load it with `reader` and cache it.
    ///
    /// `reader` runs at most once. Its error is returned as is. Store
    /// failures on the read or write-back are logged and otherwise ignored,
    /// as are undecodable cached values (treated as a miss).
    ///
    /// # Errors
    ///
    /// Returns the reader's error, or a serialization error if the loaded
    /// value cannot be encoded for caching.
    #[instrument(parent = &self.span, skip(self, reader))]
    pub async fn cached_read<T, E, F, Fut>(&self, name: &str, field: &str, reader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: From<LimitsError>,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let key = self.keys.hash_key(name);

        let mut watch = match self.store.watch(&key).await {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!(error = %e, key = %key, "failed to watch hash");
                None
            }
        };

        if let Some(w) = watch.as_mut() {
            if let Some(value) = lookup::<T>(&mut **w, &key, field).await {
                self.metrics.record_hash_cache_read(name, "hit");
                if let Some(w) = watch.take() {
                    release(w).await;
                }
                return Ok(value);
            }
        }

        self.metrics.record_hash_cache_read(name, "miss");
        let value = reader().await?;
        let encoded = serde_json::to_string(&value).map_err(|e| E::from(LimitsError::from(e)))?;

        if let Some(w) = watch {
            match w.commit_hset(field, &encoded, Some(self.ttl)).await {
                Ok(true) => debug!("cached"),
                Ok(false) => {
                    self.metrics.record_hash_cache_read(name, "conflict");
                    debug!("hash changed during read, skipped write-back");
                }
                Err(e) => warn!(error = %e, key = %key, "failed to cache value"),
            }
        }

        Ok(value)
    }

    /// Remove every cached field of `name`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), LimitsError> {
        self.store.del(&self.keys.hash_key(name)).await
    }
}

async fn lookup<T: DeserializeOwned>(
    watch: &mut dyn WatchedKey,
    key: &str,
    field: &str,
) -> Option<T> {
    match watch.hget(field).await {
        Ok(Some(raw)) => serde_json::from_str(&raw)
            .inspect_err(|e| warn!(error = %e, key, field, "ignoring undecodable cache entry"))
            .ok(),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, key, field, "failed to read cache");
            None
        }
    }
}

async fn release(watch: Box<dyn WatchedKey>) {
    if let Err(e) = watch.unwatch().await {
        debug!(error = %e, "failed to release watch");
    }
}
