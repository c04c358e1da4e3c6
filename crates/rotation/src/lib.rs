//! Stagehand Rotation - staged credential rotation
//!
//! Replaces a live credential held in a versioned secret store without
//! breaking its consumers and without ever leaving the secret without a
//! CURRENT version.
//!
//! # Features
//!
//! - **Four idempotent phases** - prepare, apply, verify, promote; any of
//!   them may be re-run with the same request token
//! - **Stage labels, not overwrites** - CURRENT, PENDING and PREVIOUS move
//!   only by compare-and-swap
//! - **Pluggable backends** - [`SecretStore`] and [`CredentialConsumer`]
//!   traits, with in-memory references and AWS Secrets Manager / PostgreSQL
//!   behind features
//! - **Alternating users** - rotate a clone principal while the active one
//!   keeps serving
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use stagehand_rotation::{
//!     InMemoryConsumer, InMemorySecretStore, OutcomeStatus, Payload, RequestToken, Rotator,
//!     RotatorConfig, SecretId, VersionId,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = SecretId::new("prod/db/app")?;
//! let store = InMemorySecretStore::new();
//! store.create_secret(
//!     secret.clone(),
//!     VersionId::new("initial")?,
//!     Payload::from_value(json!({"username": "app", "password": "p1"}))?,
//! )?;
//! let consumer = InMemoryConsumer::new().with_principal("app", "p1");
//!
//! let rotator = Rotator::new(store, consumer, RotatorConfig::default())?;
//! let outcome = rotator.rotate(&secret, &RequestToken::new("t1")?).await;
//! assert_eq!(outcome.status, OutcomeStatus::Succeeded);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

/// Core value types
pub mod core;
/// Versioned secret store client
pub mod store;
/// Credential consumer adapters
pub mod consumer;
/// Stage-label compare-and-swap
pub mod manager;
/// Orchestrator, phases, outcomes
pub mod rotation;
/// Orchestrator configuration
pub mod config;
/// Password generation
pub mod generator;
/// Trigger events
pub mod trigger;

// ── Root re-exports ─────────────────────────────────────────────────────────

pub use crate::core::{Credential, Payload, RequestToken, SecretId, Stage, StageMap, VersionId};

pub use crate::config::{ConfigError, RotationStrategy, RotatorConfig};
pub use crate::consumer::{ConsumerError, CredentialConsumer, InMemoryConsumer};
pub use crate::generator::PasswordPolicy;
pub use crate::manager::VersionStageManager;
pub use crate::rotation::{
    ErrorKind, OutcomeSink, OutcomeStatus, Phase, RotationError, RotationOutcome,
    RotationResult, Rotator,
};
pub use crate::store::{InMemorySecretStore, SecretStore, StoreError};
pub use crate::trigger::{RotationEvent, Step};

#[cfg(feature = "store-aws")]
pub use crate::store::{AwsSecretStore, AwsStoreConfig};

#[cfg(feature = "consumer-postgres")]
pub use crate::consumer::{PostgresConsumer, PostgresConsumerConfig};
