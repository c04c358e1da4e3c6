//! Retry Logic with Exponential Backoff
//!
//! Phases are idempotent, so a transient failure is handled by running the
//! whole phase again. Any other error returns immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use super::error::{RotationError, RotationResult};
use crate::config::ConfigError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationRetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f32,

    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RotationRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RotationRetryPolicy {
    /// Create a new retry policy with custom parameters
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        backoff_multiplier: f32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            backoff_multiplier,
            max_backoff,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Check the parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier".into(),
                reason: format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff".into(),
                reason: "must not exceed retry.max_backoff".into(),
            });
        }
        Ok(())
    }

    /// Calculate backoff duration for given attempt number
    ///
    /// Applies exponential backoff with ±10% jitter to prevent thundering herd.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms = self.initial_backoff.as_millis() as f32;
        let multiplier = self.backoff_multiplier.powi(attempt.min(31) as i32);
        let backoff_ms = base_ms * multiplier;

        let jitter = rand::rng().random_range(0.9..=1.1);
        let jittered_ms = (backoff_ms * jitter) as u64;

        Duration::from_millis(jittered_ms).min(self.max_backoff)
    }
}

/// Retry an async operation with exponential backoff
///
/// Only errors whose [`RotationError::is_retryable`] holds are retried.
/// Exhaustion yields [`RotationError::MaxRetriesExceeded`] carrying the last
/// error's message.
///
/// # Example
///
/// ```rust,ignore
/// let policy = RotationRetryPolicy::default();
/// let version = retry_with_backoff(&policy, "prepare", || async {
///     rotator.prepare(&secret_id, &token).await
/// }).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RotationRetryPolicy,
    operation_name: &str,
    mut f: F,
) -> RotationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RotationResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };
        attempt += 1;

        tracing::warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            error = %error,
            "Retry attempt failed"
        );

        if attempt >= max_attempts {
            return Err(RotationError::MaxRetriesExceeded {
                operation: operation_name.to_string(),
                max_attempts,
                last_error: error.to_string(),
            });
        }

        let backoff = policy.backoff_duration(attempt - 1);
        tracing::debug!(
            operation = operation_name,
            backoff_ms = backoff.as_millis() as u64,
            "Backing off before next retry"
        );
        sleep(backoff).await;
    }
}
