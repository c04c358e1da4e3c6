//! Rotation Attempt
//!
//! In-memory record of one invocation driving a rotation cycle. Nothing here
//! is persisted: the store's stage labels are the durable state, and a new
//! invocation rebuilds its attempt from scratch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{RequestToken, SecretId};

use super::error::{ErrorKind, RotationError, RotationResult};
use super::state::{Phase, RotationState};

/// Unique identifier for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Generate a new attempt ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of one invocation through the phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationAttempt {
    /// Unique attempt identifier
    pub id: AttemptId,

    /// Secret being rotated
    pub secret_id: SecretId,

    /// Cycle token
    pub request_token: RequestToken,

    /// How far this attempt got
    pub state: RotationState,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Phase that failed, if any
    pub failed_phase: Option<Phase>,

    /// Taxonomy of the failure, if any
    pub error_kind: Option<ErrorKind>,

    /// Error message if the attempt failed
    pub error_message: Option<String>,
}

impl RotationAttempt {
    /// Start a new attempt
    pub fn new(secret_id: SecretId, request_token: RequestToken) -> Self {
        Self {
            id: AttemptId::new(),
            secret_id,
            request_token,
            state: RotationState::Init,
            started_at: Utc::now(),
            completed_at: None,
            failed_phase: None,
            error_kind: None,
            error_message: None,
        }
    }

    /// Attempt that runs a single step, starting where `phase` expects
    pub fn starting_at(secret_id: SecretId, request_token: RequestToken, phase: Phase) -> Self {
        Self {
            state: phase.entry_state(),
            ..Self::new(secret_id, request_token)
        }
    }

    /// Record that `phase` completed
    pub fn advance(&mut self, phase: Phase) -> RotationResult<()> {
        self.transition_to(phase.completes_to())
    }

    /// Record that `phase` failed with `error`
    pub fn fail(&mut self, phase: Phase, error: &RotationError) -> RotationResult<()> {
        self.transition_to(RotationState::Failed)?;
        self.failed_phase = Some(phase);
        self.error_kind = Some(error.kind());
        self.error_message = Some(error.to_string());
        Ok(())
    }

    /// Wall-clock time since the attempt started
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    fn transition_to(&mut self, new_state: RotationState) -> RotationResult<()> {
        self.state = self.state.transition_to(new_state)?;
        if self.state.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> RotationAttempt {
        RotationAttempt::new(
            SecretId::new("db/app").unwrap(),
            RequestToken::new("t1").unwrap(),
        )
    }

    #[test]
    fn test_full_cycle_sets_completion() {
        let mut attempt = attempt();
        for phase in Phase::ORDER {
            assert!(attempt.completed_at.is_none());
            attempt.advance(phase).unwrap();
        }
        assert_eq!(attempt.state, RotationState::Promoted);
        assert!(attempt.completed_at.is_some());
    }

    #[test]
    fn test_fail_records_phase_and_kind() {
        let mut attempt = attempt();
        attempt.advance(Phase::Prepare).unwrap();

        let error = RotationError::Timeout {
            operation: "connect".into(),
            timeout_ms: 5,
        };
        attempt.fail(Phase::Apply, &error).unwrap();

        assert_eq!(attempt.state, RotationState::Failed);
        assert_eq!(attempt.failed_phase, Some(Phase::Apply));
        assert_eq!(attempt.error_kind, Some(ErrorKind::Transient));
        assert!(attempt.completed_at.is_some());
    }

    #[test]
    fn test_single_step_attempt() {
        let mut attempt = RotationAttempt::starting_at(
            SecretId::new("db/app").unwrap(),
            RequestToken::new("t1").unwrap(),
            Phase::Verify,
        );
        attempt.advance(Phase::Verify).unwrap();
        assert_eq!(attempt.state, RotationState::Verified);
        assert!(attempt.completed_at.is_none());
    }

    #[test]
    fn test_out_of_order_phase_is_rejected() {
        let mut attempt = attempt();
        assert!(attempt.advance(Phase::Verify).is_err());
        assert_eq!(attempt.state, RotationState::Init);
    }
}
