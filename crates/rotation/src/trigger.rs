//! Trigger events
//!
//! Schedulers invoke rotation with a JSON event in the shape secret-store
//! rotation triggers already emit:
//!
//! ```json
//! {"SecretId": "prod/db/app", "ClientRequestToken": "5b1f...", "Step": "createSecret"}
//! ```
//!
//! Without `Step` the whole cycle runs.

use serde::{Deserialize, Serialize};

use crate::core::{RequestToken, SecretId, ValidationError};
use crate::rotation::Phase;

/// Step names used by step-driven triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// [`Phase::Prepare`]
    #[serde(rename = "createSecret")]
    CreateSecret,
    /// [`Phase::Apply`]
    #[serde(rename = "setSecret")]
    SetSecret,
    /// [`Phase::Verify`]
    #[serde(rename = "testSecret")]
    TestSecret,
    /// [`Phase::Promote`]
    #[serde(rename = "finishSecret")]
    FinishSecret,
}

impl Step {
    /// Phase this step runs
    pub fn phase(self) -> Phase {
        match self {
            Step::CreateSecret => Phase::Prepare,
            Step::SetSecret => Phase::Apply,
            Step::TestSecret => Phase::Verify,
            Step::FinishSecret => Phase::Promote,
        }
    }
}

impl From<Phase> for Step {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Prepare => Step::CreateSecret,
            Phase::Apply => Step::SetSecret,
            Phase::Verify => Step::TestSecret,
            Phase::Promote => Step::FinishSecret,
        }
    }
}

/// One rotation invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotationEvent {
    /// Secret to rotate
    pub secret_id: SecretId,

    /// Idempotency key for the cycle
    #[serde(rename = "ClientRequestToken")]
    pub request_token: RequestToken,

    /// Single step to run; the full cycle when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
}

impl RotationEvent {
    /// Full-cycle event
    pub fn rotate(secret_id: SecretId, request_token: RequestToken) -> Self {
        Self {
            secret_id,
            request_token,
            step: None,
        }
    }

    /// Single-step event
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    /// Parse an event from JSON
    ///
    /// Identifier problems surface as [`ValidationError`] rather than a
    /// generic JSON error.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::MalformedPayload {
            field: "<event>".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("createSecret", Phase::Prepare)]
    #[case("setSecret", Phase::Apply)]
    #[case("testSecret", Phase::Verify)]
    #[case("finishSecret", Phase::Promote)]
    fn step_names_map_to_phases(#[case] name: &str, #[case] phase: Phase) {
        let raw = format!(r#"{{"SecretId":"db/app","ClientRequestToken":"t1","Step":"{name}"}}"#);
        let event = RotationEvent::from_json(&raw).unwrap();
        assert_eq!(event.step.map(Step::phase), Some(phase));
        assert_eq!(Step::from(phase), event.step.unwrap());
    }

    #[test]
    fn step_is_optional() {
        let event =
            RotationEvent::from_json(r#"{"SecretId":"db/app","ClientRequestToken":"t1"}"#).unwrap();
        assert_eq!(
            event,
            RotationEvent::rotate(SecretId::new("db/app").unwrap(), RequestToken::new("t1").unwrap())
        );
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"SecretId":"db/app","ClientRequestToken":"t1"}"#
        );
    }

    #[rstest]
    #[case::unknown_step(r#"{"SecretId":"db/app","ClientRequestToken":"t1","Step":"rotate"}"#)]
    #[case::bad_token(r#"{"SecretId":"db/app","ClientRequestToken":"has space"}"#)]
    #[case::missing_secret(r#"{"ClientRequestToken":"t1"}"#)]
    fn malformed_events_are_rejected(#[case] raw: &str) {
        assert!(matches!(
            RotationEvent::from_json(raw),
            Err(ValidationError::MalformedPayload { .. })
        ));
    }
}
