//! Rotation error types
//!
//! Every failure maps onto one [`ErrorKind`], which decides whether a phase
//! is retried and what the outcome record reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::consumer::ConsumerError;
use crate::core::{RequestToken, SecretId, ValidationError, VersionId};
use crate::store::StoreError;

use super::state::{Phase, RotationState};

/// Failure taxonomy reported in outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or throttling; retried with backoff
    Transient,
    /// Consumer or store refused on authorization grounds; fatal
    Permission,
    /// New credential did not authenticate; PENDING kept
    Verification,
    /// Another rotation owns the cycle
    Conflict,
    /// Malformed data, uninitialized secret or protocol misuse
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permission => "permission",
            ErrorKind::Verification => "verification",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        })
    }
}

/// Errors that can occur during credential rotation
#[derive(Debug, Error)]
pub enum RotationError {
    /// State transition is not allowed
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: RotationState,
        to: RotationState,
    },

    /// Secret has no CURRENT version
    #[error("secret {secret_id} not initialized: no CURRENT version")]
    NotInitialized { secret_id: SecretId },

    /// Phase needs a PENDING version this token never created
    #[error("no PENDING version for {secret_id} with token {request_token}")]
    PendingMissing {
        secret_id: SecretId,
        request_token: RequestToken,
    },

    /// Token's version exists but lost its labels without being promoted
    #[error("version {version_id} of {secret_id} was abandoned; start a new cycle with a fresh token")]
    Abandoned {
        secret_id: SecretId,
        version_id: VersionId,
    },

    /// Another token holds PENDING
    #[error("rotation {holder} already in progress for {secret_id}")]
    ConcurrentRotation {
        secret_id: SecretId,
        holder: VersionId,
    },

    /// No stored credential authenticates against the consumer
    #[error("no stored credential for {secret_id} authenticates against {consumer}")]
    NoUsableCredential { secret_id: SecretId, consumer: String },

    /// PENDING credential failed verification
    #[error("verification of {version_id} failed for {secret_id}: {reason}")]
    VerificationFailed {
        secret_id: SecretId,
        version_id: VersionId,
        reason: String,
    },

    /// Timeout during operation
    #[error("operation timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Maximum retry attempts exceeded
    #[error("maximum retry attempts ({max_attempts}) exceeded for {operation}: {last_error}")]
    MaxRetriesExceeded {
        operation: String,
        max_attempts: u32,
        last_error: String,
    },

    /// Secret store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Credential consumer error
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    /// Payload or identifier failed validation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Outcome could not be delivered
    #[error("outcome delivery failed: {0}")]
    Delivery(String),

    /// Internal error (should not normally occur)
    #[error("internal rotation error: {0}")]
    Internal(String),
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

impl RotationError {
    /// Taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RotationError::Timeout { .. }
            | RotationError::MaxRetriesExceeded { .. }
            | RotationError::Delivery(_) => ErrorKind::Transient,
            RotationError::Store(e) if e.is_transient() => ErrorKind::Transient,
            RotationError::Store(e) if e.is_conflict() => ErrorKind::Conflict,
            RotationError::Store(StoreError::AccessDenied(_)) => ErrorKind::Permission,
            RotationError::Consumer(e) if e.is_transient() => ErrorKind::Transient,
            RotationError::Consumer(
                ConsumerError::AuthenticationFailed { .. } | ConsumerError::PermissionDenied { .. },
            )
            | RotationError::NoUsableCredential { .. } => ErrorKind::Permission,
            RotationError::VerificationFailed { .. } => ErrorKind::Verification,
            RotationError::ConcurrentRotation { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether re-running the same phase may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Structured failure record for one rotation attempt
///
/// Written to the log when an attempt ends in FAILED, carrying enough
/// context to resume or abandon the cycle by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationErrorLog {
    /// Attempt that failed
    pub attempt_id: String,

    /// Secret being rotated
    pub secret_id: SecretId,

    /// Cycle token
    pub request_token: RequestToken,

    /// Error message
    pub error_message: String,

    /// Taxonomy bucket
    pub error_kind: ErrorKind,

    /// When the error occurred
    pub occurred_at: chrono::DateTime<chrono::Utc>,

    /// Phase that failed
    pub phase: Option<Phase>,

    /// Attempts made for that phase
    pub retry_count: u32,

    /// State the attempt had reached
    pub rotation_state: Option<RotationState>,
}

impl RotationErrorLog {
    /// Create a new error log entry
    pub fn new(
        attempt_id: impl Into<String>,
        secret_id: SecretId,
        request_token: RequestToken,
        error: &RotationError,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            secret_id,
            request_token,
            error_message: error.to_string(),
            error_kind: error.kind(),
            occurred_at: chrono::Utc::now(),
            phase: None,
            retry_count: 0,
            rotation_state: None,
        }
    }

    /// Set the failed phase
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set rotation state when error occurred
    pub fn with_rotation_state(mut self, state: RotationState) -> Self {
        self.rotation_state = Some(state);
        self
    }

    /// Emit the record as a structured `error` event
    pub fn emit(&self) {
        tracing::error!(
            attempt_id = %self.attempt_id,
            secret_id = %self.secret_id,
            request_token = %self.request_token,
            error_kind = %self.error_kind,
            phase = ?self.phase,
            retry_count = self.retry_count,
            rotation_state = ?self.rotation_state,
            error = %self.error_message,
            "Rotation attempt failed"
        );
    }
}
