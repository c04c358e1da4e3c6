//! Logger builder implementation

#[macro_use]
mod format;

use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard returned by initialization
///
/// The global subscriber lives for the rest of the process; the guard marks
/// the owner and distinguishes the installing call from a no-op one.
#[derive(Debug)]
#[must_use = "hold the guard for the lifetime of the program"]
pub struct LoggerGuard {
    installed: bool,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build the format layer without installing it.
    fn fmt_layer(&self) -> BoxedLayer {
        let config = &self.config;
        match config.format {
            Format::Pretty => boxed_fmt_layer!(tracing_subscriber::fmt::layer().pretty(), config),
            Format::Compact => boxed_fmt_layer!(tracing_subscriber::fmt::layer().compact(), config),
            Format::Json => boxed_fmt_layer!(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .flatten_event(config.display.flatten),
                config
            ),
        }
    }

    /// Build and install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level).map_err(|e| LogError::Filter {
            filter: self.config.level.clone(),
            reason: e.to_string(),
        })?;

        Registry::default()
            .with(self.fmt_layer())
            .with(filter)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        Ok(LoggerGuard { installed: true })
    }
}

impl LoggerGuard {
    pub(crate) fn noop() -> Self {
        Self { installed: false }
    }

    /// Whether this guard belongs to the call that installed the subscriber.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}
