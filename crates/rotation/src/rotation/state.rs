//! Rotation State Machine
//!
//! Tracks how far one rotation attempt has progressed.

use serde::{Deserialize, Serialize};

use super::error::{RotationError, RotationResult};

/// Protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Create the PENDING version ("createSecret")
    Prepare,
    /// Set the PENDING credential on the consumer ("setSecret")
    Apply,
    /// Authenticate with the PENDING credential ("testSecret")
    Verify,
    /// Move CURRENT to the PENDING version ("finishSecret")
    Promote,
}

impl Phase {
    /// Phases in execution order
    pub const ORDER: [Phase; 4] = [Phase::Prepare, Phase::Apply, Phase::Verify, Phase::Promote];

    /// State an attempt must be in before this phase runs
    pub fn entry_state(&self) -> RotationState {
        match self {
            Phase::Prepare => RotationState::Init,
            Phase::Apply => RotationState::Prepared,
            Phase::Verify => RotationState::Applied,
            Phase::Promote => RotationState::Verified,
        }
    }

    /// State reached when this phase completes
    pub fn completes_to(&self) -> RotationState {
        match self {
            Phase::Prepare => RotationState::Prepared,
            Phase::Apply => RotationState::Applied,
            Phase::Verify => RotationState::Verified,
            Phase::Promote => RotationState::Promoted,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Prepare => "prepare",
            Phase::Apply => "apply",
            Phase::Verify => "verify",
            Phase::Promote => "promote",
        })
    }
}

/// State of a rotation attempt
///
/// # State Transitions
///
/// ```text
/// Init → Prepared → Applied → Verified → Promoted
///   ↓        ↓          ↓         ↓
///   → → → → Failed ← ← ← ← ← ← ← ←
/// ```
///
/// There is no way back to `Init`; a failed cycle is retried by invoking
/// it again with the same token, which resumes from store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// Nothing done yet in this attempt
    Init,

    /// PENDING version exists
    Prepared,

    /// Consumer accepts the PENDING credential
    Applied,

    /// PENDING credential authenticated
    Verified,

    /// PENDING version is CURRENT
    Promoted,

    /// Attempt ended in error
    Failed,
}

impl RotationState {
    /// Check if transition to the target state is valid
    #[must_use]
    pub fn can_transition_to(&self, target: RotationState) -> bool {
        use RotationState::*;

        match (self, target) {
            // Forward progress
            (Init, Prepared) => true,
            (Prepared, Applied) => true,
            (Applied, Verified) => true,
            (Verified, Promoted) => true,

            // Fatal apply error, verify failure, or exhausted transient retries
            (Init | Prepared | Applied | Verified, Failed) => true,

            // Terminal states cannot transition
            (Promoted | Failed, _) => false,

            _ => false,
        }
    }

    /// Validate and perform state transition
    pub fn transition_to(&self, target: RotationState) -> RotationResult<RotationState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(RotationError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if state is terminal (no more transitions possible)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RotationState::Promoted | RotationState::Failed)
    }

    /// Phase that runs next from this state
    pub fn next_phase(&self) -> Option<Phase> {
        match self {
            RotationState::Init => Some(Phase::Prepare),
            RotationState::Prepared => Some(Phase::Apply),
            RotationState::Applied => Some(Phase::Verify),
            RotationState::Verified => Some(Phase::Promote),
            RotationState::Promoted | RotationState::Failed => None,
        }
    }
}

impl std::fmt::Display for RotationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationState::Init => write!(f, "init"),
            RotationState::Prepared => write!(f, "prepared"),
            RotationState::Applied => write!(f, "applied"),
            RotationState::Verified => write!(f, "verified"),
            RotationState::Promoted => write!(f, "promoted"),
            RotationState::Failed => write!(f, "failed"),
        }
    }
}
