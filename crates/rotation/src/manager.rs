//! Version stage manager
//!
//! Owns every stage-label mutation the orchestrator makes. All of them are
//! compare-and-swap moves on the label's expected holder; a lost race comes
//! back as [`StoreError::Conflict`] for the caller to re-read and decide.

use std::time::Duration;

use crate::core::{Payload, SecretId, Stage, VersionId};
use crate::rotation::{ErrorKind, RotationError, RotationResult, with_timeout};
use crate::store::{NewVersion, SecretDescription, SecretStore, StageMove, StoreError};

/// Stage-label operations over a [`SecretStore`]
#[derive(Debug)]
pub struct VersionStageManager<S> {
    store: S,
    call_timeout: Duration,
}

impl<S: SecretStore> VersionStageManager<S> {
    /// Manager bounding every store call by `call_timeout`
    pub fn new(store: S, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current stage map and version metadata
    ///
    /// A secret without CURRENT is reported as
    /// [`RotationError::NotInitialized`]. PENDING left on the CURRENT version
    /// by a promote that moved CURRENT but not PENDING is released before
    /// the map is returned.
    pub async fn snapshot(&self, secret_id: &SecretId) -> RotationResult<SecretDescription> {
        let description = self.describe(secret_id).await?;
        let stale = match (description.stages.current(), description.stages.pending()) {
            (Some(current), Some(pending)) if current == pending => current.clone(),
            _ => return Ok(description),
        };

        tracing::warn!(%secret_id, version_id = %stale, "PENDING still on the CURRENT version");
        match self.release_pending(secret_id, &stale).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Conflict => {
                tracing::debug!(%secret_id, error = %e, "Stale PENDING already moved");
            }
            Err(e) => return Err(e),
        }
        self.describe(secret_id).await
    }

    async fn describe(&self, secret_id: &SecretId) -> RotationResult<SecretDescription> {
        let description = with_timeout(
            self.call_timeout,
            "describe_versions",
            self.store.describe_versions(secret_id),
        )
        .await
        .map_err(|e| match e {
            RotationError::Store(StoreError::NotFound(_)) => RotationError::NotInitialized {
                secret_id: secret_id.clone(),
            },
            other => other,
        })?;

        if description.stages.current().is_none() {
            return Err(RotationError::NotInitialized {
                secret_id: secret_id.clone(),
            });
        }
        Ok(description)
    }

    /// Create `version_id` and label it PENDING, provided PENDING is free
    pub async fn claim_pending(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
        payload: Payload,
    ) -> RotationResult<()> {
        let request = NewVersion {
            version_id: version_id.clone(),
            payload,
            stage: Stage::Pending,
            expected_prior: None,
        };
        with_timeout(
            self.call_timeout,
            "put_version",
            self.store.put_version(secret_id, request),
        )
        .await?;

        tracing::debug!(%secret_id, %version_id, "Claimed PENDING");
        Ok(())
    }

    /// Point `stage` at `version_id`, iff `expected_prior` still holds it
    ///
    /// Moving CURRENT relabels the displaced version PREVIOUS in the same
    /// store operation.
    pub async fn move_stage(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
        stage: Stage,
        expected_prior: Option<&VersionId>,
    ) -> RotationResult<()> {
        if stage == Stage::Current && expected_prior.is_none() {
            return Err(RotationError::Internal(format!(
                "moving CURRENT of {secret_id} requires the observed holder"
            )));
        }

        let change = StageMove {
            stage,
            to: Some(version_id.clone()),
            expected_prior: expected_prior.cloned(),
        };
        with_timeout(
            self.call_timeout,
            "move_stage",
            self.store.move_stage(secret_id, change),
        )
        .await
    }

    /// Make `version_id` CURRENT in place of `expected_current`
    pub async fn promote(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
        expected_current: &VersionId,
    ) -> RotationResult<()> {
        self.move_stage(secret_id, version_id, Stage::Current, Some(expected_current))
            .await?;

        tracing::info!(
            %secret_id,
            %version_id,
            previous = %expected_current,
            "Promoted version to CURRENT"
        );
        Ok(())
    }

    /// Drop PENDING from `version_id`, iff it still holds it
    pub async fn release_pending(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
    ) -> RotationResult<()> {
        let change = StageMove {
            stage: Stage::Pending,
            to: None,
            expected_prior: Some(version_id.clone()),
        };
        with_timeout(
            self.call_timeout,
            "move_stage",
            self.store.move_stage(secret_id, change),
        )
        .await?;

        tracing::info!(%secret_id, %version_id, "Released PENDING");
        Ok(())
    }
}
