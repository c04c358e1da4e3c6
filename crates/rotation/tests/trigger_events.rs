//! Step-driven trigger events

mod common;

use common::*;
use pretty_assertions::assert_eq;
use stagehand_rotation::{ErrorKind, InMemoryConsumer, OutcomeStatus, Phase, RotationEvent, Step};

fn event(step: &str) -> RotationEvent {
    RotationEvent::from_json(&format!(
        r#"{{"SecretId":"prod/db/orders","ClientRequestToken":"t1","Step":"{step}"}}"#
    ))
    .unwrap()
}

#[tokio::test]
async fn test_step_events_complete_a_rotation() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A scheduler that sends one event per step
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));

    // WHEN: The four steps arrive in order
    for step in ["createSecret", "setSecret", "testSecret"] {
        let outcome = rotator.handle(&event(step)).await;
        assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{step}: {}", outcome.message);
        assert_eq!(stages(&rotator).await.current(), Some(&vid(INITIAL_VERSION)));
    }
    let finished = rotator.handle(&event("finishSecret")).await;

    // THEN: The last step reports the promotion
    assert_eq!(finished.status, OutcomeStatus::Succeeded);
    assert_eq!(finished.message, "version t1 is CURRENT");
    assert_eq!(stages(&rotator).await.current(), Some(&vid("t1")));

    // WHEN: The final step is redelivered
    let replay = rotator.handle(&event("finishSecret")).await;

    // THEN: Same record, nothing moved
    assert_eq!(replay, finished);
    assert_eq!(stages(&rotator).await.previous(), Some(&vid(INITIAL_VERSION)));
}

#[tokio::test]
async fn test_step_before_create_fails_without_side_effects() {
    let _guard = stagehand_log::init_test();

    // GIVEN: No createSecret step has run
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));

    // WHEN: setSecret arrives first
    let outcome = rotator.handle(&event("setSecret")).await;

    // THEN: FAILED at Apply, consumer untouched
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failed_phase, Some(Phase::Apply));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Internal));
    assert_eq!(rotator.consumer().change_count(), 0);
}

#[tokio::test]
async fn test_event_without_step_runs_full_cycle() {
    let _guard = stagehand_log::init_test();

    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));
    let event = RotationEvent::rotate(secret_id(), token("t1"));

    let outcome = rotator.handle(&event).await;

    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
    assert_eq!(stages(&rotator).await.current(), Some(&vid("t1")));
    assert_eq!(
        RotationEvent::rotate(secret_id(), token("t1")).with_step(Step::from(Phase::Verify)).step,
        Some(Step::TestSecret)
    );
}
