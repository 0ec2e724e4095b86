//! Tracing subscriber setup for hosts embedding the engine.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

fn filter_for(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::InvalidLogFilter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Returns `Ok(false)` when a global subscriber was already installed,
/// which leaves the existing one in place.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = filter_for(config)?;

    let installed = if config.json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json());
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = Registry::default().with(filter).with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        // The db and store layers log through the `log` facade.
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!("log bridge not installed: {}", e);
        }
    }

    Ok(installed)
}
