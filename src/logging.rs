//! Tracing subscriber setup for the binary
//!
//! The library only emits events; installing a subscriber is left to the
//! process that embeds it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{ExchangeError, ExchangeResult};

/// Build the filter: `RUST_LOG` if set, else the configured level.
/// `verbose` raises the configured level to debug.
pub fn filter_for(settings: &LoggingSettings, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init(settings: &LoggingSettings, verbose: bool) -> ExchangeResult<()> {
    let registry = tracing_subscriber::registry().with(filter_for(settings, verbose));

    let result = if settings.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| ExchangeError::Config(format!("Failed to initialize logging: {}", e)))
}
