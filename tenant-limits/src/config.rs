//! Configuration for the limits subsystem.
//!
//! Values are loaded from environment variables (with `.env` support) and
//! validated before any store connection is made.

use crate::error::{LimitsError, LimitsResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How `Resource::limited` behaves when the upstream limiter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimiterFailurePolicy {
    /// Keep using the last limit seen for the tenant
    #[default]
    FailOpenToLastKnownLimit,
    /// Treat the tenant as unlimited
    FailOpen,
    /// Treat the tenant as limited
    FailClosed,
}

/// The default failure policy, named so call sites read as policy.
pub const FAIL_OPEN_TO_LAST_KNOWN_LIMIT: LimiterFailurePolicy =
    LimiterFailurePolicy::FailOpenToLastKnownLimit;

impl LimiterFailurePolicy {
    /// Get the policy name used in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailOpenToLastKnownLimit => "last-known",
            Self::FailOpen => "open",
            Self::FailClosed => "closed",
        }
    }
}

impl FromStr for LimiterFailurePolicy {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last-known" | "last_known" => Ok(Self::FailOpenToLastKnownLimit),
            "open" => Ok(Self::FailOpen),
            "closed" => Ok(Self::FailClosed),
            _ => Err(LimitsError::config(format!("Invalid failure policy: {s}"))),
        }
    }
}

/// Limits subsystem configuration.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Key namespace prefix
    pub namespace: String,
    /// TTL of the cached upstream limit
    pub limit_ttl: Duration,
    /// TTL of monotonic counters; an idle counter resets after this period
    pub reset_period: Duration,
    /// Time after which the in-process limit is re-polled upstream
    pub refresh_ttl: Duration,
    /// Number of checks after which the in-process limit is re-polled upstream
    pub refresh_count: u64,
    /// Expiry of hash cache entries
    pub cache_ttl: Duration,
    /// Upper bound for a single store operation
    pub operation_timeout: Duration,
    /// Behaviour when the upstream limiter fails
    pub failure_policy: LimiterFailurePolicy,
    /// Log filter used by `init_tracing` when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            namespace: "limits".to_string(),
            limit_ttl: Duration::from_secs(1800),
            reset_period: Duration::from_secs(30),
            refresh_ttl: Duration::from_millis(1),
            refresh_count: 0,
            cache_ttl: Duration::from_secs(3600),
            operation_timeout: Duration::from_secs(2),
            failure_policy: FAIL_OPEN_TO_LAST_KNOWN_LIMIT,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl LimitsConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn from_env() -> LimitsResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_lookup<F>(lookup: F) -> LimitsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            redis_url: lookup("LIMITS_REDIS_URL").unwrap_or(defaults.redis_url),
            namespace: lookup("LIMITS_NAMESPACE").unwrap_or(defaults.namespace),
            limit_ttl: Duration::from_secs(parse_var(
                &lookup,
                "LIMITS_LIMIT_TTL_SECS",
                defaults.limit_ttl.as_secs(),
            )?),
            reset_period: Duration::from_secs(parse_var(
                &lookup,
                "LIMITS_RESET_PERIOD_SECS",
                defaults.reset_period.as_secs(),
            )?),
            refresh_ttl: Duration::from_millis(parse_var(
                &lookup,
                "LIMITS_REFRESH_TTL_MS",
                1,
            )?),
            refresh_count: parse_var(&lookup, "LIMITS_REFRESH_COUNT", defaults.refresh_count)?,
            cache_ttl: Duration::from_secs(parse_var(
                &lookup,
                "LIMITS_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            operation_timeout: Duration::from_millis(parse_var(
                &lookup,
                "LIMITS_OPERATION_TIMEOUT_MS",
                2000,
            )?),
            failure_policy: parse_var(
                &lookup,
                "LIMITS_FAILURE_POLICY",
                defaults.failure_policy,
            )?,
            log_level: lookup("LIMITS_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: parse_var(&lookup, "LIMITS_LOG_JSON", defaults.json_logs)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> LimitsResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(LimitsError::config("namespace must not be empty"));
        }
        if self.reset_period.is_zero() {
            return Err(LimitsError::config("reset period must be greater than zero"));
        }
        if self.operation_timeout.is_zero() {
            return Err(LimitsError::config("operation timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Set the Redis URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the cached limit TTL.
    #[must_use]
    pub const fn with_limit_ttl(mut self, ttl: Duration) -> Self {
        self.limit_ttl = ttl;
        self
    }

    /// Set the monotonic counter reset period.
    #[must_use]
    pub const fn with_reset_period(mut self, period: Duration) -> Self {
        self.reset_period = period;
        self
    }

    /// Set both upstream refresh thresholds.
    #[must_use]
    pub const fn with_refresh(mut self, ttl: Duration, count: u64) -> Self {
        self.refresh_ttl = ttl;
        self.refresh_count = count;
        self
    }

    /// Set the hash cache entry expiry.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the limiter failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: LimiterFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the log filter and output format.
    #[must_use]
    pub fn with_logging(mut self, level: impl Into<String>, json: bool) -> Self {
        self.log_level = level.into();
        self.json_logs = json;
        self
    }
}

/// Parse a variable with a default when absent.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> LimitsResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| LimitsError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
