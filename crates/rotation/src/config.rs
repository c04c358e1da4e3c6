//! Orchestrator configuration
//!
//! Everything here is deployment tuning rather than protocol: retry and
//! backoff, call timeouts, password policy and the rotation strategy.
//! Values load from `STAGEHAND_*` environment variables or any serde source.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::generator::PasswordPolicy;
use crate::rotation::RotationRetryPolicy;

/// Longest accepted per-call timeout
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Suffix appended to the active principal in alternating mode
pub const DEFAULT_CLONE_SUFFIX: &str = "_clone";

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        /// Offending field or variable
        field: String,
        /// What was wrong
        reason: String,
    },

    /// Missing required configuration
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// Field or variable that was absent
        field: String,
    },
}

/// Which principal a rotation changes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Change the password of the principal named in the payload
    #[default]
    SingleUser,

    /// Alternate between two principals; the inactive one gets the new
    /// password and promotion makes it active
    AlternatingUsers {
        /// Suffix distinguishing the clone principal
        #[serde(default = "default_clone_suffix")]
        clone_suffix: String,
    },
}

fn default_clone_suffix() -> String {
    DEFAULT_CLONE_SUFFIX.to_string()
}

impl RotationStrategy {
    /// Alternating strategy with the default suffix
    pub fn alternating() -> Self {
        Self::AlternatingUsers {
            clone_suffix: default_clone_suffix(),
        }
    }

    /// Principal the next version should name, given the active one
    ///
    /// ```
    /// use stagehand_rotation::RotationStrategy;
    ///
    /// let alternating = RotationStrategy::alternating();
    /// assert_eq!(alternating.next_principal("app"), "app_clone");
    /// assert_eq!(alternating.next_principal("app_clone"), "app");
    /// assert_eq!(RotationStrategy::SingleUser.next_principal("app"), "app");
    /// ```
    pub fn next_principal(&self, active: &str) -> String {
        match self {
            RotationStrategy::SingleUser => active.to_string(),
            RotationStrategy::AlternatingUsers { clone_suffix } => {
                match active.strip_suffix(clone_suffix.as_str()) {
                    Some(base) if !base.is_empty() => base.to_string(),
                    _ => format!("{active}{clone_suffix}"),
                }
            }
        }
    }

    /// Name for logs
    pub fn name(&self) -> &'static str {
        match self {
            RotationStrategy::SingleUser => "single_user",
            RotationStrategy::AlternatingUsers { .. } => "alternating_users",
        }
    }
}

/// Rotation orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    /// Which principal each cycle changes
    pub strategy: RotationStrategy,

    /// Bound on every store and consumer call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Backoff for transient phase failures
    pub retry: RotationRetryPolicy,

    /// Generated password shape
    pub password: PasswordPolicy,

    /// Issue a round trip on the verification session
    pub verify_ping: bool,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::default(),
            call_timeout: Duration::from_secs(5),
            retry: RotationRetryPolicy::default(),
            password: PasswordPolicy::default(),
            verify_ping: true,
        }
    }
}

impl RotatorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RotatorConfig::from_env`] but reads through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let clone_suffix = lookup("STAGEHAND_CLONE_SUFFIX").unwrap_or_else(default_clone_suffix);
        if let Some(strategy) = lookup("STAGEHAND_STRATEGY") {
            config.strategy = match strategy.trim().to_ascii_lowercase().as_str() {
                "single_user" | "single" => RotationStrategy::SingleUser,
                "alternating_users" | "alternating" => {
                    RotationStrategy::AlternatingUsers { clone_suffix }
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "STAGEHAND_STRATEGY".into(),
                        reason: format!(
                            "unknown strategy '{other}', expected single_user or alternating_users"
                        ),
                    });
                }
            };
        }

        if let Some(raw) = lookup("STAGEHAND_CALL_TIMEOUT") {
            config.call_timeout = parse_duration("STAGEHAND_CALL_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("STAGEHAND_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("STAGEHAND_RETRY_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("STAGEHAND_RETRY_INITIAL_BACKOFF") {
            config.retry.initial_backoff = parse_duration("STAGEHAND_RETRY_INITIAL_BACKOFF", &raw)?;
        }
        if let Some(raw) = lookup("STAGEHAND_RETRY_MAX_BACKOFF") {
            config.retry.max_backoff = parse_duration("STAGEHAND_RETRY_MAX_BACKOFF", &raw)?;
        }
        if let Some(raw) = lookup("STAGEHAND_PASSWORD_LENGTH") {
            config.password.length = parse_number("STAGEHAND_PASSWORD_LENGTH", &raw)?;
        }
        if let Some(raw) = lookup("STAGEHAND_EXCLUDE_CHARACTERS") {
            config.password.exclude_characters = raw;
        }
        if let Some(raw) = lookup("STAGEHAND_EXCLUDE_PUNCTUATION") {
            config.password.exclude_punctuation = parse_bool("STAGEHAND_EXCLUDE_PUNCTUATION", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() || self.call_timeout > MAX_CALL_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                field: "call_timeout".into(),
                reason: format!(
                    "must be greater than zero and at most {}s, got {:?}",
                    MAX_CALL_TIMEOUT.as_secs(),
                    self.call_timeout
                ),
            });
        }

        if let RotationStrategy::AlternatingUsers { clone_suffix } = &self.strategy
            && (clone_suffix.is_empty()
                || !clone_suffix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::InvalidValue {
                field: "strategy.clone_suffix".into(),
                reason: "must be non-empty and contain only ASCII letters, digits or '_'".into(),
            });
        }

        self.retry.validate()?;
        self.password.validate()
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: e.to_string(),
        }
    })
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field: field.into(),
        reason: e.to_string(),
    })
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.into(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
