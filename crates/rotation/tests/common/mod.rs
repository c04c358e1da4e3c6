//! Shared fixtures for rotation integration tests

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use stagehand_rotation::rotation::RotationRetryPolicy;
use stagehand_rotation::store::SecretStore;
use stagehand_rotation::{
    InMemoryConsumer, InMemorySecretStore, Payload, RequestToken, Rotator, RotatorConfig, SecretId,
    Stage, StageMap, VersionId,
};

pub type MemoryRotator = Rotator<InMemorySecretStore, InMemoryConsumer>;

pub const INITIAL_VERSION: &str = "v0";

pub fn secret_id() -> SecretId {
    SecretId::new("prod/db/orders").unwrap()
}

pub fn token(id: &str) -> RequestToken {
    RequestToken::new(id).unwrap()
}

pub fn vid(id: &str) -> VersionId {
    VersionId::new(id).unwrap()
}

/// Payload as an operator would seed it
pub fn initial_payload(username: &str, password: &str) -> Value {
    json!({
        "engine": "postgres",
        "host": "orders.db.internal",
        "port": 5432,
        "dbname": "orders",
        "username": username,
        "password": password,
    })
}

/// Retries fast enough for tests; backoff still runs
pub fn fast_config() -> RotatorConfig {
    RotatorConfig {
        call_timeout: Duration::from_secs(1),
        retry: RotationRetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(10)),
        ..RotatorConfig::default()
    }
}

/// Store holding one secret whose CURRENT is `initial_payload(username, password)`
pub fn seeded_store(username: &str, password: &str) -> InMemorySecretStore {
    let store = InMemorySecretStore::new();
    store
        .create_secret(
            secret_id(),
            vid(INITIAL_VERSION),
            Payload::from_value(initial_payload(username, password)).unwrap(),
        )
        .unwrap();
    store
}

/// Single-user rotator over `app` / `p1`
pub fn rotator(consumer: InMemoryConsumer) -> MemoryRotator {
    rotator_with(consumer, fast_config())
}

pub fn rotator_with(consumer: InMemoryConsumer, config: RotatorConfig) -> MemoryRotator {
    Rotator::new(seeded_store("app", "p1"), consumer, config).unwrap()
}

pub async fn stages(rotator: &MemoryRotator) -> StageMap {
    rotator
        .store()
        .describe_versions(&secret_id())
        .await
        .unwrap()
        .stages
}

pub async fn payload_at(rotator: &MemoryRotator, stage: Stage) -> Payload {
    rotator
        .store()
        .get_version(&secret_id(), stage)
        .await
        .unwrap()
        .payload
}

pub async fn password_at(rotator: &MemoryRotator, stage: Stage) -> String {
    payload_at(rotator, stage)
        .await
        .get_str("password")
        .unwrap()
        .to_string()
}
