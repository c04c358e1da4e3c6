//! Core value types shared by the store, consumer and orchestrator layers

mod error;
mod id;
mod payload;
mod stage;

pub use error::ValidationError;
pub use id::{RequestToken, SecretId, VersionId};
pub use payload::{Credential, Payload};
pub use stage::{Stage, StageMap};
