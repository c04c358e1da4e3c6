//! Versioned secret store client
//!
//! [`SecretStore`] is the typed surface the orchestrator drives. Two rules
//! every implementation upholds:
//!
//! - a stage label only ever moves through a compare-and-swap on its current
//!   holder ([`StageMove::expected_prior`], [`NewVersion::expected_prior`]);
//! - moving CURRENT is a single operation that also relabels the displaced
//!   version PREVIOUS and drops PENDING from the promoted one, so no reader
//!   ever observes zero or two CURRENT versions.

mod error;
mod memory;

#[cfg(feature = "store-aws")]
mod aws;

pub use error::{StoreError, StoreResult};
pub use memory::InMemorySecretStore;

#[cfg(feature = "store-aws")]
pub use aws::{AwsStoreConfig, AwsSecretStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{Payload, SecretId, Stage, StageMap, VersionId};

/// One version of a secret, as read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    /// Version identifier
    pub version_id: VersionId,
    /// Stored value
    pub payload: Payload,
    /// Labels the version held when read
    pub stages: Vec<Stage>,
    /// When the version was written
    pub created_at: DateTime<Utc>,
}

/// Metadata of one version, as listed by [`SecretStore::describe_versions`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version identifier
    pub version_id: VersionId,
    /// Labels currently attached
    pub stages: Vec<Stage>,
    /// When the version was written
    pub created_at: DateTime<Utc>,
    /// When the version last became CURRENT, if the store tracks it
    pub promoted_at: Option<DateTime<Utc>>,
}

/// Stage map plus version metadata for one secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDescription {
    /// Secret described
    pub secret_id: SecretId,
    /// Stage → version assignments
    pub stages: StageMap,
    /// Known versions, oldest first
    pub versions: Vec<VersionInfo>,
    /// Versions whose payload was pruned; their ids are never reused
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired: Vec<VersionInfo>,
}

impl SecretDescription {
    /// Metadata for `version_id`, whether it is still stored or retired
    pub fn version(&self, version_id: &VersionId) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .chain(&self.retired)
            .find(|v| &v.version_id == version_id)
    }
}

/// Request to write a new version and attach one label to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    /// Id of the version to create
    pub version_id: VersionId,
    /// Value to store
    pub payload: Payload,
    /// Label to attach; never CURRENT
    pub stage: Stage,
    /// Holder of `stage` the caller observed (`None`: unassigned)
    pub expected_prior: Option<VersionId>,
}

/// Request to repoint or clear one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMove {
    /// Label to move
    pub stage: Stage,
    /// New holder; `None` clears the label (not allowed for CURRENT)
    pub to: Option<VersionId>,
    /// Holder of `stage` the caller observed
    pub expected_prior: Option<VersionId>,
}

/// Typed operations against a versioned secret store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Read the version holding `stage`
    async fn get_version(&self, secret_id: &SecretId, stage: Stage) -> StoreResult<SecretVersion>;

    /// Read a version by id
    async fn get_version_by_id(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
    ) -> StoreResult<SecretVersion>;

    /// Create a version and attach its label in one compare-and-swap
    ///
    /// Writing an existing version id with an identical payload is a no-op.
    /// A different payload under an existing id is a conflict.
    async fn put_version(&self, secret_id: &SecretId, version: NewVersion) -> StoreResult<()>;

    /// Stage map and version metadata
    async fn describe_versions(&self, secret_id: &SecretId) -> StoreResult<SecretDescription>;

    /// Move or clear one label, guarded by its expected holder
    async fn move_stage(&self, secret_id: &SecretId, change: StageMove) -> StoreResult<()>;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn get_version(&self, secret_id: &SecretId, stage: Stage) -> StoreResult<SecretVersion> {
        (**self).get_version(secret_id, stage).await
    }

    async fn get_version_by_id(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
    ) -> StoreResult<SecretVersion> {
        (**self).get_version_by_id(secret_id, version_id).await
    }

    async fn put_version(&self, secret_id: &SecretId, version: NewVersion) -> StoreResult<()> {
        (**self).put_version(secret_id, version).await
    }

    async fn describe_versions(&self, secret_id: &SecretId) -> StoreResult<SecretDescription> {
        (**self).describe_versions(secret_id).await
    }

    async fn move_stage(&self, secret_id: &SecretId, change: StageMove) -> StoreResult<()> {
        (**self).move_stage(secret_id, change).await
    }
}
