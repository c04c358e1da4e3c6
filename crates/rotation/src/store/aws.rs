//! AWS Secrets Manager backend
//!
//! Stage labels map onto the service's staging labels (`AWSCURRENT`,
//! `AWSPENDING`, `AWSPREVIOUS`) and a version id is the `ClientRequestToken`
//! it was written with.
//!
//! # Compare-and-swap
//!
//! The service exposes no conditional write on staging labels, so the
//! expected-holder check is a read followed by a write. The CURRENT move
//! itself is a single `UpdateSecretVersionStage` call with
//! `RemoveFromVersionId` set to the observed holder, which the service
//! rejects if that version no longer holds the label. The service relabels
//! the displaced version `AWSPREVIOUS` in the same call; dropping
//! `AWSPENDING` from the promoted version is a second call.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use stagehand_rotation::store::{AwsSecretStore, AwsStoreConfig};
//!
//! let store = AwsSecretStore::new(AwsStoreConfig {
//!     region: Some("eu-west-1".into()),
//!     ..Default::default()
//! })
//! .await?;
//! ```

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    NewVersion, SecretDescription, SecretStore, SecretVersion, StageMove, StoreError, StoreResult,
    VersionInfo,
};
use crate::config::ConfigError;
use crate::core::{Payload, SecretId, Stage, StageMap, VersionId};

/// AWS Secrets Manager connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsStoreConfig {
    /// Region; `None` uses the default provider chain
    pub region: Option<String>,

    /// Endpoint override (LocalStack and similar)
    pub endpoint_url: Option<String>,

    /// SDK operation timeout, including SDK-level retries
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for AwsStoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl AwsStoreConfig {
    /// Read `AWS_REGION` and `STAGEHAND_AWS_ENDPOINT_URL` over the defaults
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("AWS_REGION").ok(),
            endpoint_url: std::env::var("STAGEHAND_AWS_ENDPOINT_URL").ok(),
            ..Self::default()
        }
    }

    /// Check the settings before the SDK is loaded
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout_secs = self.operation_timeout.as_secs();
        if !(1..=60).contains(&timeout_secs) {
            return Err(ConfigError::InvalidValue {
                field: "operation_timeout".into(),
                reason: format!("must be between 1 and 60 seconds, got {timeout_secs} seconds"),
            });
        }

        if let Some(endpoint) = &self.endpoint_url
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "endpoint_url".into(),
                reason: "must start with http:// or https://".into(),
            });
        }

        Ok(())
    }
}

/// Secret store backed by AWS Secrets Manager
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: SecretsManagerClient,
}

fn label(stage: Stage) -> &'static str {
    match stage {
        Stage::Current => "AWSCURRENT",
        Stage::Pending => "AWSPENDING",
        Stage::Previous => "AWSPREVIOUS",
    }
}

fn parse_label(raw: &str) -> Option<Stage> {
    match raw {
        "AWSCURRENT" => Some(Stage::Current),
        "AWSPENDING" => Some(Stage::Pending),
        "AWSPREVIOUS" => Some(Stage::Previous),
        _ => None,
    }
}

fn parse_labels(raw: &[String]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = raw.iter().filter_map(|l| parse_label(l)).collect();
    stages.sort();
    stages
}

fn to_chrono(date: Option<&aws_sdk_secretsmanager::primitives::DateTime>) -> DateTime<Utc> {
    date.and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos()))
        .unwrap_or_default()
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&err));

    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return StoreError::Unavailable(message);
    }

    match err.code() {
        Some("ResourceNotFoundException") => StoreError::NotFound(message),
        Some("AccessDeniedException") => StoreError::AccessDenied(message),
        Some("ThrottlingException" | "InternalServiceError" | "ServiceUnavailable") => {
            StoreError::Unavailable(message)
        }
        _ => StoreError::Invalid(message),
    }
}

impl AwsSecretStore {
    /// Load SDK configuration and build the client
    pub async fn new(config: AwsStoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).timeout_config(
            aws_config::timeout::TimeoutConfig::builder()
                .operation_timeout(config.operation_timeout)
                .build(),
        );

        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let client = SecretsManagerClient::new(&sdk_config);

        tracing::info!(
            backend = "aws",
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            "Initialized AWS Secrets Manager store"
        );

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: SecretsManagerClient) -> Self {
        Self { client }
    }

    async fn read(
        &self,
        secret_id: &SecretId,
        stage: Option<Stage>,
        version_id: Option<&VersionId>,
    ) -> StoreResult<SecretVersion> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id.as_str())
            .set_version_stage(stage.map(|s| label(s).to_string()))
            .set_version_id(version_id.map(|v| v.as_str().to_string()))
            .send()
            .await
            .map_err(|e| classify("GetSecretValue", e))?;

        let raw = output.secret_string().ok_or_else(|| {
            StoreError::Invalid(format!("{secret_id} holds binary data, expected a JSON string"))
        })?;
        let version_id = output
            .version_id()
            .ok_or_else(|| StoreError::Invalid("GetSecretValue returned no VersionId".into()))?;

        Ok(SecretVersion {
            version_id: VersionId::new(version_id)?,
            payload: Payload::parse(raw)?,
            stages: parse_labels(output.version_stages()),
            created_at: to_chrono(output.created_date()),
        })
    }

    async fn holder(&self, secret_id: &SecretId, stage: Stage) -> StoreResult<Option<VersionId>> {
        Ok(self
            .describe_versions(secret_id)
            .await?
            .stages
            .get(stage)
            .cloned())
    }

    async fn update_stage(
        &self,
        secret_id: &SecretId,
        stage: Stage,
        move_to: Option<&VersionId>,
        remove_from: Option<&VersionId>,
    ) -> StoreResult<()> {
        self.client
            .update_secret_version_stage()
            .secret_id(secret_id.as_str())
            .version_stage(label(stage))
            .set_move_to_version_id(move_to.map(|v| v.as_str().to_string()))
            .set_remove_from_version_id(remove_from.map(|v| v.as_str().to_string()))
            .send()
            .await
            .map_err(|e| classify("UpdateSecretVersionStage", e))?;
        Ok(())
    }
}

fn check_holder(
    stage: Stage,
    expected: Option<&VersionId>,
    actual: Option<VersionId>,
) -> StoreResult<()> {
    if actual.as_ref() == expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            stage,
            expected: expected.cloned(),
            actual,
        })
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    fn backend(&self) -> &'static str {
        "aws"
    }

    #[tracing::instrument(skip(self), fields(backend = "aws", secret_id = %secret_id))]
    async fn get_version(&self, secret_id: &SecretId, stage: Stage) -> StoreResult<SecretVersion> {
        self.read(secret_id, Some(stage), None).await
    }

    #[tracing::instrument(skip(self), fields(backend = "aws", secret_id = %secret_id))]
    async fn get_version_by_id(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
    ) -> StoreResult<SecretVersion> {
        self.read(secret_id, None, Some(version_id)).await
    }

    #[tracing::instrument(
        skip(self, version),
        fields(backend = "aws", secret_id = %secret_id, version_id = %version.version_id)
    )]
    async fn put_version(&self, secret_id: &SecretId, version: NewVersion) -> StoreResult<()> {
        if version.stage == Stage::Current {
            return Err(StoreError::Invalid(
                "new versions cannot be written directly to CURRENT".to_string(),
            ));
        }

        let actual = self.holder(secret_id, version.stage).await?;
        if actual.as_ref() == Some(&version.version_id) {
            tracing::debug!("version already holds the requested stage");
            return Ok(());
        }
        check_holder(version.stage, version.expected_prior.as_ref(), actual)?;

        let result = self
            .client
            .put_secret_value()
            .secret_id(secret_id.as_str())
            .client_request_token(version.version_id.as_str())
            .secret_string(version.payload.to_secret_string())
            .version_stages(label(version.stage))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("ResourceExistsException") => {
                Err(StoreError::VersionExists(version.version_id))
            }
            Err(e) => Err(classify("PutSecretValue", e)),
        }
    }

    #[tracing::instrument(skip(self), fields(backend = "aws", secret_id = %secret_id))]
    async fn describe_versions(&self, secret_id: &SecretId) -> StoreResult<SecretDescription> {
        let mut stages = StageMap::new();
        let mut versions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_secret_version_ids()
                .secret_id(secret_id.as_str())
                .include_deprecated(true)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify("ListSecretVersionIds", e))?;

            for entry in page.versions() {
                let Some(raw_id) = entry.version_id() else {
                    continue;
                };
                let version_id = VersionId::new(raw_id)?;
                let labels = parse_labels(entry.version_stages());
                for stage in &labels {
                    stages.set(*stage, version_id.clone());
                }
                versions.push(VersionInfo {
                    version_id,
                    stages: labels,
                    created_at: to_chrono(entry.created_date()),
                    promoted_at: None,
                });
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        versions.sort_by_key(|v| v.created_at);
        // Deprecated versions are listed above; the service keeps no record
        // of ids it has deleted, so there is nothing to report as retired.
        Ok(SecretDescription {
            secret_id: secret_id.clone(),
            stages,
            versions,
            retired: Vec::new(),
        })
    }

    #[tracing::instrument(
        skip(self, change),
        fields(backend = "aws", secret_id = %secret_id, stage = %change.stage)
    )]
    async fn move_stage(&self, secret_id: &SecretId, change: StageMove) -> StoreResult<()> {
        let actual = self.holder(secret_id, change.stage).await?;
        check_holder(change.stage, change.expected_prior.as_ref(), actual.clone())?;

        let Some(target) = change.to else {
            if change.stage == Stage::Current {
                return Err(StoreError::Invalid(format!(
                    "refusing to leave {secret_id} without a CURRENT version"
                )));
            }
            if let Some(holder) = &actual {
                self.update_stage(secret_id, change.stage, None, Some(holder))
                    .await?;
            }
            return Ok(());
        };

        if actual.as_ref() == Some(&target) {
            return Ok(());
        }

        self.update_stage(secret_id, change.stage, Some(&target), actual.as_ref())
            .await?;

        if change.stage == Stage::Current {
            let promoted = self.read(secret_id, None, Some(&target)).await?;
            if promoted.stages.contains(&Stage::Pending) {
                self.update_stage(secret_id, Stage::Pending, None, Some(&target))
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(parse_label(label(stage)), Some(stage));
        }
        assert_eq!(parse_label("CUSTOM"), None);
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let labels = vec!["AWSPREVIOUS".to_string(), "blue".to_string(), "AWSCURRENT".to_string()];
        assert_eq!(parse_labels(&labels), vec![Stage::Current, Stage::Previous]);
    }

    #[test]
    fn config_validation() {
        assert!(AwsStoreConfig::default().validate().is_ok());

        let slow = AwsStoreConfig {
            operation_timeout: Duration::from_secs(120),
            ..Default::default()
        };
        assert!(slow.validate().is_err());

        let bad_endpoint = AwsStoreConfig {
            endpoint_url: Some("localhost:4566".into()),
            ..Default::default()
        };
        assert!(bad_endpoint.validate().is_err());
    }
}
