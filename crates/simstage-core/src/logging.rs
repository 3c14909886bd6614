//! Tracing subscriber setup.
//!
//! `SIMSTAGE_LOG_FORMAT=json` switches to machine-parseable output
//! regardless of the configured format; `RUST_LOG` overrides the configured
//! filter.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Environment variable that overrides [`LoggingConfig::format`].
pub const LOG_FORMAT_ENV: &str = "SIMSTAGE_LOG_FORMAT";

/// Format after applying the environment override.
#[must_use]
pub fn effective_format(config: &LoggingConfig) -> LogFormat {
    std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|name| LogFormat::from_name(&name))
        .unwrap_or(config.format)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let installed = match effective_format(config) {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_falls_back_to_config() {
        if std::env::var(LOG_FORMAT_ENV).is_ok() {
            return;
        }
        let config = LoggingConfig {
            filter: "simstage=debug".to_owned(),
            format: LogFormat::Json,
        };
        assert_eq!(effective_format(&config), LogFormat::Json);
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig::default();
        // Another test may have installed a subscriber first; either way the
        // second attempt in this process must fail.
        let _ = init(&config);
        assert!(matches!(init(&config), Err(ConfigError::Logging(_))));
    }
}
