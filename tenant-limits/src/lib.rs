//! Tenant resource limits and counters backed by a shared key-value store.
//!
//! This crate provides:
//! - Per-tenant limit lookup with in-process caching and a failure policy
//! - Count-based resources (consume / return units against a limit)
//! - Monotonic sequences that survive expiry without ever moving backward
//! - A read-through hash cache with optimistic write-back
//! - Redis and in-memory store implementations
//! - Configuration, Prometheus metrics and tracing setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod count_resource;
pub mod error;
pub mod hash_cache;
pub mod keys;
pub mod metrics;
pub mod monotonic;
pub mod resource;
pub mod store;
pub mod telemetry;

pub use collaborators::{CountRefresh, ResourceCounter, ResourceLimiter};
pub use config::{LimiterFailurePolicy, LimitsConfig, FAIL_OPEN_TO_LAST_KNOWN_LIMIT};
pub use count_resource::CountResource;
pub use error::{LimitsError, LimitsResult};
pub use hash_cache::HashCache;
pub use keys::KeyLayout;
pub use metrics::LimitsMetrics;
pub use monotonic::MonotonicCounter;
pub use resource::{Resource, UNLIMITED};
pub use store::{KeyValueStore, MemoryStore, RedisStore, WatchedKey};
pub use telemetry::{init_tracing, root_span};
