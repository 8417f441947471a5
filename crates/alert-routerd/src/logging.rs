//! Tracing subscriber setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{DaemonError, DaemonResult};

/// Builds the filter: `RUST_LOG` wins, then `override_level`, then the
/// configured level.
///
/// # Errors
///
/// Returns `DaemonError::Logging` if the chosen directive is invalid.
pub fn build_filter(
    config: &LoggingConfig,
    override_level: Option<&str>,
) -> DaemonResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = override_level.unwrap_or(&config.level);
    EnvFilter::try_new(level)
        .map_err(|e| DaemonError::Logging(format!("invalid level '{level}': {e}")))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `DaemonError::Logging` if the filter is invalid or a subscriber
/// is already installed.
pub fn init(config: &LoggingConfig, override_level: Option<&str>) -> DaemonResult<()> {
    let filter = build_filter(config, override_level)?;

    let json = config.json.then(|| fmt::layer().json());
    let text = (!config.json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| DaemonError::Logging(e.to_string()))
}
