//! In-process secret store
//!
//! Every mutation runs under one lock, which makes the stage CAS exact.
//! Used by tests and as the reference for backend semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{
    NewVersion, SecretDescription, SecretStore, SecretVersion, StageMove, StoreError, StoreResult,
    VersionInfo,
};
use crate::core::{Payload, SecretId, Stage, StageMap, VersionId};

/// Unlabeled versions kept per secret before the oldest are pruned
pub const DEFAULT_RETAINED_UNLABELED: usize = 8;

#[derive(Debug, Clone)]
struct StoredVersion {
    id: VersionId,
    payload: Payload,
    created_at: DateTime<Utc>,
    promoted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SecretRecord {
    /// Oldest first
    versions: Vec<StoredVersion>,
    stages: StageMap,
    /// Pruned versions, payload dropped
    retired: Vec<VersionInfo>,
}

impl SecretRecord {
    fn find(&self, id: &VersionId) -> Option<&StoredVersion> {
        self.versions.iter().find(|v| &v.id == id)
    }

    fn is_retired(&self, id: &VersionId) -> bool {
        self.retired.iter().any(|v| &v.version_id == id)
    }

    fn find_mut(&mut self, id: &VersionId) -> Option<&mut StoredVersion> {
        self.versions.iter_mut().find(|v| &v.id == id)
    }

    fn read(&self, version: &StoredVersion) -> SecretVersion {
        SecretVersion {
            version_id: version.id.clone(),
            payload: version.payload.clone(),
            stages: self.stages.stages_of(&version.id),
            created_at: version.created_at,
        }
    }

    fn check_holder(&self, stage: Stage, expected: Option<&VersionId>) -> StoreResult<()> {
        let actual = self.stages.get(stage);
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                stage,
                expected: expected.cloned(),
                actual: actual.cloned(),
            })
        }
    }

    fn prune(&mut self, keep_unlabeled: usize) {
        let unlabeled = self
            .versions
            .iter()
            .filter(|v| !self.stages.is_labeled(&v.id))
            .count();
        let mut excess = unlabeled.saturating_sub(keep_unlabeled);
        if excess == 0 {
            return;
        }
        let stages = &self.stages;
        let retired = &mut self.retired;
        self.versions.retain(|v| {
            if excess > 0 && !stages.is_labeled(&v.id) {
                excess -= 1;
                retired.push(VersionInfo {
                    version_id: v.id.clone(),
                    stages: Vec::new(),
                    created_at: v.created_at,
                    promoted_at: v.promoted_at,
                });
                false
            } else {
                true
            }
        });
    }
}

/// Secret store held in memory
#[derive(Debug)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<SecretId, SecretRecord>>,
    retain_unlabeled: usize,
    failures_remaining: AtomicU32,
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySecretStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            secrets: Mutex::new(HashMap::new()),
            retain_unlabeled: DEFAULT_RETAINED_UNLABELED,
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Override how many unlabeled versions survive per secret
    #[must_use]
    pub fn with_retained_unlabeled(mut self, keep: usize) -> Self {
        self.retain_unlabeled = keep;
        self
    }

    /// Create a secret with its initial CURRENT version
    pub fn create_secret(
        &self,
        secret_id: SecretId,
        version_id: VersionId,
        payload: Payload,
    ) -> StoreResult<()> {
        let mut secrets = self.secrets.lock();
        if secrets.contains_key(&secret_id) {
            return Err(StoreError::Invalid(format!("secret {secret_id} already exists")));
        }
        let now = Utc::now();
        let mut record = SecretRecord::default();
        record.versions.push(StoredVersion {
            id: version_id.clone(),
            payload,
            created_at: now,
            promoted_at: Some(now),
        });
        record.stages.set(Stage::Current, version_id);
        secrets.insert(secret_id, record);
        Ok(())
    }

    /// Make the next `calls` operations fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, calls: u32) {
        self.failures_remaining.store(calls, Ordering::SeqCst);
    }

    /// Number of versions held for `secret_id`, labeled or not
    pub fn version_count(&self, secret_id: &SecretId) -> usize {
        self.secrets
            .lock()
            .get(secret_id)
            .map_or(0, |r| r.versions.len())
    }

    fn inject_failure(&self) -> StoreResult<()> {
        let took = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if took.is_ok() {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_record<T>(
        &self,
        secret_id: &SecretId,
        f: impl FnOnce(&mut SecretRecord) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.inject_failure()?;
        let mut secrets = self.secrets.lock();
        let record = secrets
            .get_mut(secret_id)
            .ok_or_else(|| StoreError::NotFound(format!("secret {secret_id}")))?;
        let result = f(&mut *record);
        record.prune(self.retain_unlabeled);
        result
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_version(&self, secret_id: &SecretId, stage: Stage) -> StoreResult<SecretVersion> {
        self.with_record(secret_id, |record| {
            let id = record
                .stages
                .get(stage)
                .ok_or_else(|| StoreError::NotFound(format!("stage {stage} of {secret_id}")))?;
            let version = record
                .find(id)
                .ok_or_else(|| StoreError::NotFound(format!("version {id} of {secret_id}")))?;
            Ok(record.read(version))
        })
    }

    async fn get_version_by_id(
        &self,
        secret_id: &SecretId,
        version_id: &VersionId,
    ) -> StoreResult<SecretVersion> {
        self.with_record(secret_id, |record| {
            let version = record.find(version_id).ok_or_else(|| {
                StoreError::NotFound(format!("version {version_id} of {secret_id}"))
            })?;
            Ok(record.read(version))
        })
    }

    async fn put_version(&self, secret_id: &SecretId, version: NewVersion) -> StoreResult<()> {
        if version.stage == Stage::Current {
            return Err(StoreError::Invalid(
                "new versions cannot be written directly to CURRENT".to_string(),
            ));
        }

        self.with_record(secret_id, |record| {
            if record.is_retired(&version.version_id) {
                return Err(StoreError::VersionExists(version.version_id));
            }
            if let Some(existing) = record.find(&version.version_id) {
                return if existing.payload == version.payload {
                    Ok(())
                } else {
                    Err(StoreError::VersionExists(version.version_id))
                };
            }

            record.check_holder(version.stage, version.expected_prior.as_ref())?;
            record.versions.push(StoredVersion {
                id: version.version_id.clone(),
                payload: version.payload,
                created_at: Utc::now(),
                promoted_at: None,
            });
            record.stages.set(version.stage, version.version_id);
            Ok(())
        })
    }

    async fn describe_versions(&self, secret_id: &SecretId) -> StoreResult<SecretDescription> {
        self.with_record(secret_id, |record| {
            Ok(SecretDescription {
                secret_id: secret_id.clone(),
                stages: record.stages.clone(),
                versions: record
                    .versions
                    .iter()
                    .map(|v| VersionInfo {
                        version_id: v.id.clone(),
                        stages: record.stages.stages_of(&v.id),
                        created_at: v.created_at,
                        promoted_at: v.promoted_at,
                    })
                    .collect(),
                retired: record.retired.clone(),
            })
        })
    }

    async fn move_stage(&self, secret_id: &SecretId, change: StageMove) -> StoreResult<()> {
        self.with_record(secret_id, |record| {
            record.check_holder(change.stage, change.expected_prior.as_ref())?;

            let Some(target) = change.to else {
                if change.stage == Stage::Current {
                    return Err(StoreError::Invalid(format!(
                        "refusing to leave {secret_id} without a CURRENT version"
                    )));
                }
                record.stages.clear(change.stage);
                return Ok(());
            };

            if record.find(&target).is_none() {
                return Err(StoreError::NotFound(format!("version {target} of {secret_id}")));
            }

            if change.stage != Stage::Current {
                record.stages.set(change.stage, target);
                return Ok(());
            }

            if record.stages.current() == Some(&target) {
                return Ok(());
            }

            if record.stages.pending() == Some(&target) {
                record.stages.clear(Stage::Pending);
            }
            if let Some(displaced) = record.stages.set(Stage::Current, target.clone()) {
                record.stages.set(Stage::Previous, displaced);
            }
            if let Some(promoted) = record.find_mut(&target) {
                promoted.promoted_at = Some(Utc::now());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sid() -> SecretId {
        SecretId::new("db/app").unwrap()
    }

    fn vid(id: &str) -> VersionId {
        VersionId::new(id).unwrap()
    }

    fn payload(password: &str) -> Payload {
        Payload::from_value(json!({"username": "app", "password": password})).unwrap()
    }

    fn seeded() -> InMemorySecretStore {
        let store = InMemorySecretStore::new();
        store.create_secret(sid(), vid("v0"), payload("p0")).unwrap();
        store
    }

    fn pending(id: &str, password: &str) -> NewVersion {
        NewVersion {
            version_id: vid(id),
            payload: payload(password),
            stage: Stage::Pending,
            expected_prior: None,
        }
    }

    #[tokio::test]
    async fn put_claims_pending_once() {
        let store = seeded();
        store.put_version(&sid(), pending("t1", "p1")).await.unwrap();

        let err = store.put_version(&sid(), pending("t2", "p2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { stage: Stage::Pending, .. }));
    }

    #[tokio::test]
    async fn put_same_version_twice_is_noop() {
        let store = seeded();
        store.put_version(&sid(), pending("t1", "p1")).await.unwrap();
        store.put_version(&sid(), pending("t1", "p1")).await.unwrap();
        assert_eq!(store.version_count(&sid()), 2);

        let err = store.put_version(&sid(), pending("t1", "other")).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionExists(_)));
    }

    #[tokio::test]
    async fn put_to_current_is_rejected() {
        let store = seeded();
        let mut version = pending("t1", "p1");
        version.stage = Stage::Current;
        assert!(matches!(
            store.put_version(&sid(), version).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn promoting_relabels_previous_and_clears_pending() {
        let store = seeded();
        store.put_version(&sid(), pending("t1", "p1")).await.unwrap();
        store
            .move_stage(
                &sid(),
                StageMove {
                    stage: Stage::Current,
                    to: Some(vid("t1")),
                    expected_prior: Some(vid("v0")),
                },
            )
            .await
            .unwrap();

        let desc = store.describe_versions(&sid()).await.unwrap();
        assert_eq!(desc.stages.current(), Some(&vid("t1")));
        assert_eq!(desc.stages.previous(), Some(&vid("v0")));
        assert_eq!(desc.stages.pending(), None);
        assert!(desc.version(&vid("t1")).unwrap().promoted_at.is_some());
    }

    #[tokio::test]
    async fn stale_expected_current_conflicts() {
        let store = seeded();
        store.put_version(&sid(), pending("t1", "p1")).await.unwrap();
        let err = store
            .move_stage(
                &sid(),
                StageMove {
                    stage: Stage::Current,
                    to: Some(vid("t1")),
                    expected_prior: Some(vid("stale")),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let current = store.get_version(&sid(), Stage::Current).await.unwrap();
        assert_eq!(current.version_id, vid("v0"));
    }

    #[tokio::test]
    async fn clearing_current_is_refused() {
        let store = seeded();
        let err = store
            .move_stage(
                &sid(),
                StageMove {
                    stage: Stage::Current,
                    to: None,
                    expected_prior: Some(vid("v0")),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn unlabeled_versions_are_pruned_oldest_first() {
        let store = InMemorySecretStore::new().with_retained_unlabeled(1);
        store.create_secret(sid(), vid("v0"), payload("p0")).unwrap();

        let mut current = vid("v0");
        for i in 1..=3 {
            let id = vid(&format!("t{i}"));
            store
                .put_version(&sid(), pending(id.as_str(), &format!("p{i}")))
                .await
                .unwrap();
            store
                .move_stage(
                    &sid(),
                    StageMove {
                        stage: Stage::Current,
                        to: Some(id.clone()),
                        expected_prior: Some(current),
                    },
                )
                .await
                .unwrap();
            current = id;
        }

        // CURRENT t3, PREVIOUS t2, one unlabeled survivor t1; v0 pruned
        let desc = store.describe_versions(&sid()).await.unwrap();
        let ids: Vec<_> = desc.versions.iter().map(|v| v.version_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);

        // v0 is remembered with its promotion time and its id stays taken
        let v0 = desc.version(&vid("v0")).unwrap();
        assert!(v0.promoted_at.is_some());
        assert!(v0.stages.is_empty());
        let err = store.put_version(&sid(), pending("v0", "p0")).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionExists(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let store = seeded();
        store.fail_next(2);
        assert!(store.get_version(&sid(), Stage::Current).await.unwrap_err().is_transient());
        assert!(store.describe_versions(&sid()).await.is_err());
        assert!(store.get_version(&sid(), Stage::Current).await.is_ok());
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let store = InMemorySecretStore::new();
        assert!(matches!(
            store.describe_versions(&sid()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
