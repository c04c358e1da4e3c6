//! Rotation Outcome Events
//!
//! Every invocation ends in exactly one [`RotationOutcome`], handed to an
//! [`OutcomeSink`]. Formatting and routing the record further is the
//! sink's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::{ErrorKind, RotationError, RotationResult};
use super::retry::{RotationRetryPolicy, retry_with_backoff};
use super::state::Phase;
use crate::core::{RequestToken, SecretId, VersionId};

/// Terminal status of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// Every requested phase completed
    Succeeded,
    /// A phase failed; see `failed_phase` and `error_kind`
    Failed,
    /// Another rotation owns the cycle; nothing was changed
    InProgress,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Succeeded => "SUCCEEDED",
            OutcomeStatus::Failed => "FAILED",
            OutcomeStatus::InProgress => "IN_PROGRESS",
        })
    }
}

/// Terminal record of one rotation invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutcome {
    /// Secret that was rotated
    pub secret_id: SecretId,

    /// Cycle token
    pub request_token: RequestToken,

    /// How the invocation ended
    pub status: OutcomeStatus,

    /// Phase that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,

    /// Taxonomy bucket of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Human-readable summary
    pub message: String,

    /// Version the cycle created, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,

    /// When the outcome was reached
    pub timestamp: DateTime<Utc>,
}

impl RotationOutcome {
    /// The token's version became (or already was) CURRENT at `promoted_at`
    pub fn succeeded(
        secret_id: SecretId,
        request_token: RequestToken,
        promoted_at: DateTime<Utc>,
    ) -> Self {
        let version_id = request_token.version_id();
        Self {
            message: format!("version {version_id} is CURRENT"),
            secret_id,
            request_token,
            status: OutcomeStatus::Succeeded,
            failed_phase: None,
            error_kind: None,
            version_id: Some(version_id),
            timestamp: promoted_at,
        }
    }

    /// A single step completed without reaching CURRENT
    pub fn step_completed(secret_id: SecretId, request_token: RequestToken, phase: Phase) -> Self {
        let version_id = request_token.version_id();
        Self {
            message: format!("{phase} completed for version {version_id}"),
            secret_id,
            request_token,
            status: OutcomeStatus::Succeeded,
            failed_phase: None,
            error_kind: None,
            version_id: Some(version_id),
            timestamp: Utc::now(),
        }
    }

    /// `phase` failed with `error`
    pub fn failed(
        secret_id: SecretId,
        request_token: RequestToken,
        phase: Phase,
        error: &RotationError,
    ) -> Self {
        Self {
            secret_id,
            request_token,
            status: OutcomeStatus::Failed,
            failed_phase: Some(phase),
            error_kind: Some(error.kind()),
            message: error.to_string(),
            version_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Another rotation holds the cycle
    pub fn in_progress(
        secret_id: SecretId,
        request_token: RequestToken,
        holder: Option<&VersionId>,
    ) -> Self {
        let message = match holder {
            Some(holder) => format!("rotation {holder} already in progress"),
            None => "another rotation already in progress".to_string(),
        };
        Self {
            secret_id,
            request_token,
            status: OutcomeStatus::InProgress,
            failed_phase: None,
            error_kind: None,
            message,
            version_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether the invocation ended in FAILED
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

/// Receiver of rotation outcomes
///
/// Implement this to forward outcomes to a notification system, a queue or
/// an audit table.
///
/// # Example
///
/// ```rust,ignore
/// use stagehand_rotation::rotation::{OutcomeSink, RotationOutcome, RotationResult};
///
/// struct AuditTable { pool: PgPool }
///
/// #[async_trait]
/// impl OutcomeSink for AuditTable {
///     async fn publish(&self, outcome: &RotationOutcome) -> RotationResult<()> {
///         sqlx::query("INSERT INTO rotations (secret, status) VALUES ($1, $2)")
///             .bind(outcome.secret_id.as_str())
///             .bind(outcome.status.to_string())
///             .execute(&self.pool)
///             .await
///             .map_err(|e| RotationError::Delivery(e.to_string()))?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Deliver one outcome
    async fn publish(&self, outcome: &RotationOutcome) -> RotationResult<()>;
}

/// Writes outcomes as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl OutcomeSink for LogSink {
    async fn publish(&self, outcome: &RotationOutcome) -> RotationResult<()> {
        match outcome.status {
            OutcomeStatus::Failed => tracing::warn!(
                secret_id = %outcome.secret_id,
                request_token = %outcome.request_token,
                status = %outcome.status,
                failed_phase = ?outcome.failed_phase,
                error_kind = ?outcome.error_kind,
                "Rotation outcome: {}",
                outcome.message
            ),
            _ => tracing::info!(
                secret_id = %outcome.secret_id,
                request_token = %outcome.request_token,
                status = %outcome.status,
                version_id = ?outcome.version_id,
                "Rotation outcome: {}",
                outcome.message
            ),
        }
        Ok(())
    }
}

/// Forwards outcomes into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RotationOutcome>,
}

impl ChannelSink {
    /// Sink plus the receiving half, with room for `capacity` outcomes
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RotationOutcome>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Sink over an existing sender
    pub fn from_sender(tx: mpsc::Sender<RotationOutcome>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutcomeSink for ChannelSink {
    async fn publish(&self, outcome: &RotationOutcome) -> RotationResult<()> {
        self.tx
            .send(outcome.clone())
            .await
            .map_err(|_| RotationError::Delivery("outcome receiver dropped".to_string()))
    }
}

/// Discards outcomes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl OutcomeSink for NoopSink {
    async fn publish(&self, _outcome: &RotationOutcome) -> RotationResult<()> {
        Ok(())
    }
}

/// Deliver an outcome with retry
///
/// A delivery failure is logged and swallowed; it never changes the outcome
/// of the rotation that produced it.
pub async fn deliver_outcome<S: OutcomeSink + ?Sized>(
    sink: &S,
    outcome: &RotationOutcome,
    policy: &RotationRetryPolicy,
) {
    let delivered =
        retry_with_backoff(policy, "publish_outcome", || async { sink.publish(outcome).await })
            .await;

    if let Err(e) = delivered {
        tracing::error!(
            secret_id = %outcome.secret_id,
            request_token = %outcome.request_token,
            status = %outcome.status,
            error = %e,
            "Failed to deliver rotation outcome"
        );
    }
}
