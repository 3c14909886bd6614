//! Configuration loading for systems built from a TOML file.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [system]
//! name = "pendulum"
//! version = "1.0"
//!
//! [events]
//! accuracy = 1e-3
//! localization_window = 0.1
//!
//! [logging]
//! filter = "simstage=info"
//! format = "text"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::primitives::{DEFAULT_EVENT_ACCURACY, DEFAULT_LOCALIZATION_WINDOW};

/// Errors that can occur when loading configuration or installing logging.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse TOML content.
    #[error("failed to parse config TOML: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub system: SystemSection,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Identity of the system being built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    pub name: String,
    pub version: String,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            name: "system".to_owned(),
            version: "0.0.0".to_owned(),
        }
    }
}

/// Event handling defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Accuracy passed to handlers when the driver has no better value.
    pub accuracy: f64,
    /// Localization window for trigger infos that leave it unset.
    pub localization_window: f64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            accuracy: DEFAULT_EVENT_ACCURACY,
            localization_window: DEFAULT_LOCALIZATION_WINDOW,
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Parse `"json"` or `"text"`, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "simstage=info".to_owned(),
            format: LogFormat::Text,
        }
    }
}
