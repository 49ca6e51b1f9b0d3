//! Error types for tenant limit and counter operations.
//!
//! Errors are classified so callers can tell transient store trouble
//! (retryable, usually recovered internally by recomputing from the source
//! of truth) apart from protocol errors, which indicate a programming mistake.

use thiserror::Error;

/// Error code returned by the counter script when the key is absent.
pub const SCRIPT_NOT_FOUND: &str = "NOT_FOUND";
/// Error code returned by the counter script when a decrement would go below zero.
pub const SCRIPT_UNDERFLOW: &str = "UNDERFLOW";
/// Error code returned by the counter script for a negative delta.
pub const SCRIPT_NEGATIVE_DELTA: &str = "NEGATIVE_DELTA";
/// Error code returned by the counter script for an unknown operation.
pub const SCRIPT_UNKNOWN_OP: &str = "UNKNOWN_OP";
/// Error code returned by the counter script when an increment would overflow.
pub const SCRIPT_OVERFLOW: &str = "OVERFLOW";

/// Errors raised by the limits subsystem.
#[derive(Error, Debug)]
pub enum LimitsError {
    /// Backing store failure (connection, protocol, bad value)
    #[error("Store error: {0}")]
    Store(String),

    /// Redis client error not covered by a more specific variant
    #[error("Redis error: {0}")]
    Redis(#[source] redis::RedisError),

    /// Store operation exceeded the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Counter key does not exist
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Decrement would take the counter below zero
    #[error("Counter exhausted: {0}")]
    Underflow(String),

    /// Malformed internal call (negative delta, overflowing increment, unknown script operation)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Upstream limiter failed
    #[error("Resource limiter failed: {0}")]
    Limiter(String),

    /// Upstream usage counter failed
    #[error("Resource counter failed: {0}")]
    Counter(String),

    /// Upstream sequence refresh failed
    #[error("Count refresh failed: {0}")]
    Refresh(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type for limits operations.
pub type LimitsResult<T> = Result<T, LimitsError>;

impl From<redis::RedisError> for LimitsError {
    fn from(err: redis::RedisError) -> Self {
        let detail = err.detail().unwrap_or_default();
        err.code()
            .and_then(|code| Self::from_script_code(code, detail))
            .unwrap_or(Self::Redis(err))
    }
}

impl LimitsError {
    /// Map a counter script error code to its typed error.
    #[must_use]
    pub fn from_script_code(code: &str, detail: &str) -> Option<Self> {
        match code {
            SCRIPT_NOT_FOUND => Some(Self::NotFound(detail.to_string())),
            SCRIPT_UNDERFLOW => Some(Self::Underflow(detail.to_string())),
            SCRIPT_NEGATIVE_DELTA | SCRIPT_UNKNOWN_OP | SCRIPT_OVERFLOW => {
                Some(Self::InvalidArgument(format!("{code} {detail}")))
            }
            _ => None,
        }
    }

    /// Check if this error reports an absent counter key.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error is a programming error that must never be absorbed.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this error is transient and the operation may succeed on retry.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenant_limits::LimitsError;
    ///
    /// assert!(LimitsError::store("connection reset").is_retryable());
    /// assert!(!LimitsError::invalid_argument("negative delta").is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(_) | Self::Timeout(_) => true,
            Self::Redis(err) => matches!(
                err.kind(),
                redis::ErrorKind::IoError
                    | redis::ErrorKind::BusyLoadingError
                    | redis::ErrorKind::TryAgain
            ),
            _ => false,
        }
    }

    /// Create a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a not found error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Create an underflow error for the given key.
    #[must_use]
    pub fn underflow(key: impl Into<String>) -> Self {
        Self::Underflow(key.into())
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
