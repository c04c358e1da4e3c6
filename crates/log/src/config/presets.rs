//! Configuration presets for common scenarios

use super::{Config, DisplayConfig, Format};
use crate::{LOG_ENV, LOG_FORMAT_ENV};

impl Config {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads through `lookup`.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = lookup(LOG_ENV).or_else(|| lookup("RUST_LOG")) {
            config.level = level;
        }

        // Unknown names fall back to compact
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = Format::parse(&format).unwrap_or(Format::Compact);
        }

        if config.format == Format::Json {
            config.display.flatten = true;
        }

        config
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Test configuration (captured by libtest)
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Compact,
            display: DisplayConfig {
                colors: false,
                time: false,
                ..DisplayConfig::default()
            },
            test_writer: true,
        }
    }
}
