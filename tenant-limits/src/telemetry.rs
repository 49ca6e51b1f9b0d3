//! Tracing subscriber setup for services embedding the limits crate.
//!
//! Components never install a subscriber themselves; they log under the
//! span handed to them with `with_span`. Binaries call [`init_tracing`] once.

use crate::config::LimitsConfig;
use crate::error::{LimitsError, LimitsResult};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when set.
///
/// # Errors
///
/// Returns a configuration error if the log filter does not parse or a
/// global subscriber is already installed.
pub fn init_tracing(config: &LimitsConfig) -> LimitsResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LimitsError::config(format!("invalid log level: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| LimitsError::config(format!("tracing already initialised: {e}")))
}

/// Root span for the limit components of `service`.
#[must_use]
pub fn root_span(service: &str) -> Span {
    tracing::info_span!("limits", service)
}
