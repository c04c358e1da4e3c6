//! Credential Rotation Module
//!
//! Drives the four-phase rotation protocol against a [`SecretStore`] and a
//! [`CredentialConsumer`]:
//!
//! | Phase | Trigger step | Effect |
//! |-------|--------------|--------|
//! | [`Phase::Prepare`] | `createSecret` | new version labeled PENDING |
//! | [`Phase::Apply`] | `setSecret` | consumer accepts the PENDING credential |
//! | [`Phase::Verify`] | `testSecret` | PENDING credential authenticates |
//! | [`Phase::Promote`] | `finishSecret` | PENDING becomes CURRENT in one CAS |
//!
//! Each phase reads the store before acting and returns early when its
//! effect is already in place, so any phase may be invoked again with the
//! same request token.
//!
//! ## Failure Handling
//!
//! - Transient errors (network, timeout, throttling) re-run the phase with
//!   exponential backoff and jitter
//! - Permission and verification failures end the attempt; CURRENT is
//!   never touched before Promote
//! - A stage conflict means another token owns the cycle and yields an
//!   `IN_PROGRESS` outcome rather than an error
//!
//! # Example
//!
//! ```rust,no_run
//! use stagehand_rotation::{InMemoryConsumer, InMemorySecretStore, RequestToken, Rotator, RotatorConfig, SecretId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemorySecretStore::new();
//! let consumer = InMemoryConsumer::new();
//! let rotator = Rotator::new(store, consumer, RotatorConfig::default())?;
//!
//! let outcome = rotator
//!     .rotate(&SecretId::new("prod/db/app")?, &RequestToken::generate())
//!     .await;
//! println!("{}: {}", outcome.status, outcome.message);
//! # Ok(())
//! # }
//! ```
//!
//! [`SecretStore`]: crate::store::SecretStore
//! [`CredentialConsumer`]: crate::consumer::CredentialConsumer

pub mod attempt;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod state;

pub use attempt::{AttemptId, RotationAttempt};
pub use error::{ErrorKind, RotationError, RotationErrorLog, RotationResult};
pub use events::{
    ChannelSink, LogSink, NoopSink, OutcomeSink, OutcomeStatus, RotationOutcome, deliver_outcome,
};
pub use orchestrator::{PhaseStatus, Rotator};
pub use retry::{RotationRetryPolicy, retry_with_backoff};
pub use state::{Phase, RotationState};

use std::future::Future;
use std::time::Duration;

/// Run one store or consumer call under `timeout`
///
/// Elapsed calls become [`RotationError::Timeout`], which is transient.
pub(crate) async fn with_timeout<T, E, F>(
    timeout: Duration,
    operation: &str,
    call: F,
) -> RotationResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<RotationError>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(RotationError::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
