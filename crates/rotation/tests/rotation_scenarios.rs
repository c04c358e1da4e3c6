//! End-to-end rotation scenarios against the in-memory store and consumer
//!
//! Covers the happy path, resumption after transient and verification
//! failures, replay of a completed token and successive cycles.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use stagehand_rotation::rotation::ChannelSink;
use stagehand_rotation::store::{SecretStore, StageMove};
use stagehand_rotation::{
    Credential, ErrorKind, InMemoryConsumer, InMemorySecretStore, OutcomeStatus, Payload, Phase,
    Rotator, Stage,
};

#[tokio::test]
async fn test_fresh_rotation_promotes_new_version() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A secret whose CURRENT is app/p1 and a consumer that accepts it
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));

    // WHEN: We rotate with a fresh token
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: The cycle succeeds and the token's version is CURRENT
    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
    assert_eq!(outcome.version_id, Some(vid("t1")));
    assert_eq!(outcome.failed_phase, None);

    let stages = stages(&rotator).await;
    assert_eq!(stages.current(), Some(&vid("t1")));
    assert_eq!(stages.previous(), Some(&vid(INITIAL_VERSION)));
    assert_eq!(stages.pending(), None);

    // THEN: PREVIOUS holds exactly the pre-rotation payload
    assert_eq!(
        payload_at(&rotator, Stage::Previous).await,
        Payload::from_value(initial_payload("app", "p1")).unwrap()
    );

    // THEN: Only the password changed, and the consumer holds the new one
    let current = payload_at(&rotator, Stage::Current).await;
    let new_password = current.get_str("password").unwrap().to_string();
    assert_ne!(new_password, "p1");
    assert_eq!(new_password.chars().count(), 32);
    assert_eq!(
        current.with_password("p1"),
        Payload::from_value(initial_payload("app", "p1")).unwrap()
    );
    assert_eq!(rotator.consumer().password_of("app"), Some(new_password));
}

#[tokio::test]
async fn test_consumer_down_during_apply_resumes_without_new_password() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A consumer that refuses connections
    let consumer = InMemoryConsumer::new().with_principal("app", "p1");
    consumer.set_down(true);
    let rotator = rotator(consumer);

    // WHEN: We rotate
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Apply fails as transient after retries, CURRENT is untouched
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failed_phase, Some(Phase::Apply));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Transient));
    assert_eq!(password_at(&rotator, Stage::Current).await, "p1");

    let stages_after_failure = stages(&rotator).await;
    assert_eq!(stages_after_failure.current(), Some(&vid(INITIAL_VERSION)));
    assert_eq!(stages_after_failure.pending(), Some(&vid("t1")));
    let pending_password = password_at(&rotator, Stage::Pending).await;

    // WHEN: The consumer recovers and the same token is retried
    rotator.consumer().set_down(false);
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: The cycle completes with the password generated the first time
    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
    assert_eq!(password_at(&rotator, Stage::Current).await, pending_password);
    assert_eq!(rotator.consumer().change_count(), 1);
    assert_eq!(rotator.store().version_count(&secret_id()), 2);
}

#[tokio::test]
async fn test_verification_failure_keeps_current_and_pending() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A consumer that stores the wrong value on the next change
    let consumer = InMemoryConsumer::new().with_principal("app", "p1");
    consumer.corrupt_next_change();
    let rotator = rotator(consumer);

    // WHEN: We rotate
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Verify fails, CURRENT keeps the pre-rotation payload, PENDING stays
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failed_phase, Some(Phase::Verify));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Verification));

    assert_eq!(
        payload_at(&rotator, Stage::Current).await,
        Payload::from_value(initial_payload("app", "p1")).unwrap()
    );
    let stages = stages(&rotator).await;
    assert_eq!(stages.pending(), Some(&vid("t1")));
    assert_eq!(stages.current(), Some(&vid(INITIAL_VERSION)));
}

#[tokio::test]
async fn test_verification_failure_recovers_with_same_token() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A dual-password consumer whose first change is corrupted
    let consumer = InMemoryConsumer::new()
        .with_retain_previous(true)
        .with_principal("app", "p1");
    consumer.corrupt_next_change();
    let rotator = rotator(consumer);

    let first = rotator.rotate(&secret_id(), &token("t1")).await;
    assert_eq!(first.error_kind, Some(ErrorKind::Verification));
    let pending_password = password_at(&rotator, Stage::Pending).await;

    // WHEN: The same token is retried
    let second = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Apply re-sets the stored PENDING value and the cycle completes
    assert_eq!(second.status, OutcomeStatus::Succeeded, "{}", second.message);
    assert_eq!(password_at(&rotator, Stage::Current).await, pending_password);
    assert_eq!(
        rotator.consumer().password_of("app"),
        Some(pending_password)
    );
}

#[tokio::test]
async fn test_lost_current_credential_is_a_permission_failure() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A single-password consumer left holding a corrupted value
    let consumer = InMemoryConsumer::new().with_principal("app", "p1");
    consumer.corrupt_next_change();
    let rotator = rotator(consumer);
    rotator.rotate(&secret_id(), &token("t1")).await;

    // WHEN: The same token is retried
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: No stored credential authenticates, which needs an operator
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failed_phase, Some(Phase::Apply));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Permission));
    assert_eq!(password_at(&rotator, Stage::Current).await, "p1");
}

#[tokio::test]
async fn test_permission_denied_is_fatal_and_not_retried() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A consumer that refuses credential changes
    let consumer = InMemoryConsumer::new().with_principal("app", "p1");
    consumer.set_deny_changes(true);
    let rotator = rotator(consumer);

    // WHEN: We rotate
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: FAILED with Permission, nothing applied, CURRENT untouched
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failed_phase, Some(Phase::Apply));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Permission));
    assert_eq!(rotator.consumer().change_count(), 0);
    assert_eq!(rotator.consumer().password_of("app").as_deref(), Some("p1"));
    assert_eq!(stages(&rotator).await.current(), Some(&vid(INITIAL_VERSION)));
}

#[tokio::test]
async fn test_replaying_completed_token_yields_identical_outcome() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A completed rotation
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));
    let first = rotator.rotate(&secret_id(), &token("t1")).await;

    // WHEN: The same token is invoked again
    let second = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: One effective rotation, two identical outcomes
    assert_eq!(first, second);
    assert_eq!(rotator.consumer().change_count(), 1);
    assert_eq!(rotator.store().version_count(&secret_id()), 2);
}

#[tokio::test]
async fn test_new_token_after_completion_starts_a_new_cycle() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A completed rotation with token t1
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));
    rotator.rotate(&secret_id(), &token("t1")).await;
    let t1_password = password_at(&rotator, Stage::Current).await;

    // WHEN: A brand-new token prepares
    rotator.prepare(&secret_id(), &token("t2")).await.unwrap();

    // THEN: A distinct PENDING version exists alongside CURRENT
    let stages_mid = stages(&rotator).await;
    assert_eq!(stages_mid.pending(), Some(&vid("t2")));
    assert_eq!(stages_mid.current(), Some(&vid("t1")));
    assert_ne!(password_at(&rotator, Stage::Pending).await, t1_password);

    // WHEN: The cycle completes
    let outcome = rotator.rotate(&secret_id(), &token("t2")).await;
    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);

    // THEN: t1 is PREVIOUS and the old PREVIOUS lost its label
    let stages_after = stages(&rotator).await;
    assert_eq!(stages_after.current(), Some(&vid("t2")));
    assert_eq!(stages_after.previous(), Some(&vid("t1")));
    assert!(!stages_after.is_labeled(&vid(INITIAL_VERSION)));
    assert_eq!(password_at(&rotator, Stage::Previous).await, t1_password);
}

#[tokio::test]
async fn test_exactly_one_current_and_original_credential_valid_until_promote() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A dual-password consumer
    let rotator = rotator(
        InMemoryConsumer::new()
            .with_retain_previous(true)
            .with_principal("app", "p1"),
    );
    let original = Credential::new("app", "p1");
    let t1 = token("t1");

    // WHEN: Phases run one at a time
    for phase in [Phase::Prepare, Phase::Apply, Phase::Verify] {
        let outcome = rotator.run_step(&secret_id(), &t1, phase).await;
        assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{phase}: {}", outcome.message);

        // THEN: After every phase there is one CURRENT, still the original,
        // and the original credential still authenticates
        let description = rotator.store().describe_versions(&secret_id()).await.unwrap();
        let holders = description
            .versions
            .iter()
            .filter(|v| v.stages.contains(&Stage::Current))
            .count();
        assert_eq!(holders, 1, "after {phase}");
        assert_eq!(description.stages.current(), Some(&vid(INITIAL_VERSION)));
        assert!(rotator.consumer().accepts(&original), "after {phase}");
    }

    let outcome = rotator.run_step(&secret_id(), &t1, Phase::Promote).await;
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(stages(&rotator).await.current(), Some(&vid("t1")));
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A store whose next two calls fail
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));
    rotator.store().fail_next(2);

    // WHEN: We rotate
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Backoff absorbs the failures
    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
}

#[tokio::test]
async fn test_malformed_current_payload_fails_prepare() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A CURRENT payload without a password field
    let store = InMemorySecretStore::new();
    store
        .create_secret(
            secret_id(),
            vid(INITIAL_VERSION),
            Payload::from_value(json!({"username": "app"})).unwrap(),
        )
        .unwrap();
    let rotator = Rotator::new(store, InMemoryConsumer::new(), fast_config()).unwrap();

    // WHEN: We rotate
    let outcome = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Prepare fails as internal and nothing is written
    assert_eq!(outcome.failed_phase, Some(Phase::Prepare));
    assert_eq!(outcome.error_kind, Some(ErrorKind::Internal));
    assert_eq!(rotator.store().version_count(&secret_id()), 1);
}

#[tokio::test]
async fn test_exactly_one_outcome_per_invocation() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A rotator publishing into a channel
    let (sink, mut rx) = ChannelSink::new(8);
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1")).with_sink(sink);

    // WHEN: One successful and one failing invocation run
    let ok = rotator.rotate(&secret_id(), &token("t1")).await;
    rotator.consumer().set_deny_changes(true);
    let failed = rotator.rotate(&secret_id(), &token("t2")).await;

    // THEN: Each produced exactly one record, in order
    assert_eq!(rx.try_recv().unwrap(), ok);
    assert_eq!(rx.try_recv().unwrap(), failed);
    assert!(rx.try_recv().is_err());
    assert!(failed.is_failure());
}

#[tokio::test]
async fn test_pending_left_on_current_does_not_block_next_rotation() {
    let _guard = stagehand_log::init_test();

    // GIVEN: t1 was promoted but PENDING was never dropped from it
    let rotator = rotator(InMemoryConsumer::new().with_principal("app", "p1"));
    let first = rotator.rotate(&secret_id(), &token("t1")).await;
    rotator
        .store()
        .move_stage(
            &secret_id(),
            StageMove {
                stage: Stage::Pending,
                to: Some(vid("t1")),
                expected_prior: None,
            },
        )
        .await
        .unwrap();

    // WHEN: t1 is replayed
    let replay = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: Same outcome, and the leftover label is gone
    assert_eq!(replay, first);
    assert_eq!(stages(&rotator).await.pending(), None);

    // WHEN: A new token rotates
    let outcome = rotator.rotate(&secret_id(), &token("t2")).await;

    // THEN: It is not reported as blocked by t1
    assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
    let stages = stages(&rotator).await;
    assert_eq!(stages.current(), Some(&vid("t2")));
    assert_eq!(stages.previous(), Some(&vid("t1")));
}

#[tokio::test]
async fn test_replaying_token_after_its_version_was_pruned_changes_nothing() {
    let _guard = stagehand_log::init_test();

    // GIVEN: A store keeping two unlabeled versions, and five completed cycles
    let store = InMemorySecretStore::new().with_retained_unlabeled(2);
    store
        .create_secret(
            secret_id(),
            vid(INITIAL_VERSION),
            Payload::from_value(initial_payload("app", "p1")).unwrap(),
        )
        .unwrap();
    let consumer = InMemoryConsumer::new().with_principal("app", "p1");
    let rotator = Rotator::new(store, consumer, fast_config()).unwrap();

    let first = rotator.rotate(&secret_id(), &token("t1")).await;
    for i in 2..=5 {
        let outcome = rotator.rotate(&secret_id(), &token(&format!("t{i}"))).await;
        assert_eq!(outcome.status, OutcomeStatus::Succeeded, "{}", outcome.message);
    }
    assert_eq!(rotator.store().version_count(&secret_id()), 4);
    let password = rotator.consumer().password_of("app");

    // WHEN: The first token is replayed
    let replay = rotator.rotate(&secret_id(), &token("t1")).await;

    // THEN: It reports the original outcome and touches neither side
    assert_eq!(replay, first);
    assert_eq!(rotator.consumer().change_count(), 5);
    assert_eq!(rotator.consumer().password_of("app"), password);
    assert_eq!(stages(&rotator).await.current(), Some(&vid("t5")));
}
