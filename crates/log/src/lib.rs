//! # Stagehand Log
//!
//! Zero-config `tracing` setup for stagehand binaries and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn main() -> Result<(), stagehand_log::LogError> {
//!     // Picks up STAGEHAND_LOG / RUST_LOG, otherwise a build-profile preset
//!     let _guard = stagehand_log::auto_init()?;
//!
//!     tracing::info!(secret_id = "db/app", "rotation requested");
//!     Ok(())
//! }
//! ```
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `STAGEHAND_LOG` | filter directives, e.g. `info,stagehand_rotation=debug` |
//! | `RUST_LOG` | fallback when `STAGEHAND_LOG` is unset |
//! | `STAGEHAND_LOG_FORMAT` | `pretty`, `compact` or `json` |

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format};
pub use error::{LogError, LogResult};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "STAGEHAND_LOG";

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "STAGEHAND_LOG_FORMAT";

/// Auto-detect and initialize the best logging configuration.
///
/// An explicit filter in the environment wins; otherwise debug builds get
/// [`Config::development`] and release builds [`Config::production`].
pub fn auto_init() -> LogResult<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }

    if std::env::var(LOG_ENV).is_ok() || std::env::var("RUST_LOG").is_ok() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with custom configuration.
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialize for tests.
///
/// Safe to call from every test: the first caller installs a compact,
/// test-writer subscriber and later callers get a no-op guard.
pub fn init_test() -> LoggerGuard {
    if tracing::dispatcher::has_been_set() {
        return LoggerGuard::noop();
    }
    // Another test thread may win the race between the check and install.
    init_with(Config::test()).unwrap_or_else(|_| LoggerGuard::noop())
}
