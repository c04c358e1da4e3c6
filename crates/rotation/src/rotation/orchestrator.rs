//! Rotation orchestrator
//!
//! [`Rotator`] runs the four phases for one `(secret, token)` pair. It keeps
//! no state between invocations: every phase starts by describing the secret
//! and classifying where this token's version stands.

use std::sync::Arc;

use tracing::Instrument;

use super::attempt::RotationAttempt;
use super::error::{ErrorKind, RotationError, RotationErrorLog, RotationResult};
use super::events::{LogSink, OutcomeSink, RotationOutcome, deliver_outcome};
use super::retry::retry_with_backoff;
use super::state::{Phase, RotationState};
use super::with_timeout;
use crate::config::{ConfigError, RotatorConfig};
use crate::consumer::{ConsumerError, CredentialConsumer};
use crate::core::{Credential, Payload, RequestToken, SecretId, Stage, VersionId};
use crate::manager::VersionStageManager;
use crate::store::{SecretDescription, SecretStore, SecretVersion, StoreError};
use crate::trigger::RotationEvent;

/// Promote re-reads and retries this many times when it loses the CURRENT CAS
const PROMOTE_CAS_ATTEMPTS: u32 = 3;

/// Result of running one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseStatus {
    /// The phase changed store or consumer state
    Completed,
    /// The phase's effect was already in place
    AlreadyDone,
    /// Another token holds PENDING; nothing was changed
    InProgress {
        /// Version holding PENDING
        holder: VersionId,
    },
}

/// Where a token's version stands in the store
#[derive(Debug, Clone, PartialEq, Eq)]
enum Progress {
    NotStarted,
    Blocked(VersionId),
    Pending,
    Promoted,
    Superseded,
    Abandoned,
}

impl Progress {
    fn of(description: &SecretDescription, version_id: &VersionId) -> Self {
        let stages = &description.stages;
        if stages.current() == Some(version_id) {
            return Progress::Promoted;
        }
        if stages.pending() == Some(version_id) {
            return Progress::Pending;
        }
        if stages.previous() == Some(version_id) {
            return Progress::Superseded;
        }
        if let Some(version) = description.version(version_id) {
            return if version.promoted_at.is_some() {
                Progress::Superseded
            } else {
                Progress::Abandoned
            };
        }
        match stages.pending() {
            Some(holder) => Progress::Blocked(holder.clone()),
            None => Progress::NotStarted,
        }
    }
}

fn is_auth_failure(error: &RotationError) -> bool {
    matches!(error, RotationError::Consumer(e) if e.is_auth_failure())
}

/// Version the conflict was lost to, when the error says
fn conflict_holder(error: &RotationError) -> Option<&VersionId> {
    match error {
        RotationError::ConcurrentRotation { holder, .. } => Some(holder),
        RotationError::Store(StoreError::Conflict { actual, .. }) => actual.as_ref(),
        _ => None,
    }
}

/// Staged credential rotation over a secret store and a consumer
pub struct Rotator<S, C> {
    stages: VersionStageManager<S>,
    consumer: C,
    config: RotatorConfig,
    sink: Arc<dyn OutcomeSink>,
}

impl<S, C> std::fmt::Debug for Rotator<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: SecretStore, C: CredentialConsumer> Rotator<S, C> {
    /// Rotator reporting outcomes to the log
    pub fn new(store: S, consumer: C, config: RotatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            stages: VersionStageManager::new(store, config.call_timeout),
            consumer,
            config,
            sink: Arc::new(LogSink),
        })
    }

    /// Send outcomes to `sink` instead of the log
    #[must_use]
    pub fn with_sink(mut self, sink: impl OutcomeSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Secret store
    pub fn store(&self) -> &S {
        self.stages.store()
    }

    /// Credential consumer
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Active configuration
    pub fn config(&self) -> &RotatorConfig {
        &self.config
    }

    /// Run the full cycle for `request_token`
    ///
    /// Resumes from whatever the store shows this token has completed.
    /// Exactly one outcome is published per call.
    pub async fn rotate(&self, secret_id: &SecretId, request_token: &RequestToken) -> RotationOutcome {
        let mut attempt = RotationAttempt::new(secret_id.clone(), request_token.clone());
        let span = tracing::info_span!(
            "rotate",
            %secret_id,
            %request_token,
            attempt_id = %attempt.id,
            strategy = self.config.strategy.name(),
        );

        async {
            tracing::info!("Starting rotation");
            let outcome = self.drive(&mut attempt, &Phase::ORDER).await;
            deliver_outcome(self.sink.as_ref(), &outcome, &self.config.retry).await;
            outcome
        }
        .instrument(span)
        .await
    }

    /// Run one phase, as a step-driven trigger does
    pub async fn run_step(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
        phase: Phase,
    ) -> RotationOutcome {
        let mut attempt =
            RotationAttempt::starting_at(secret_id.clone(), request_token.clone(), phase);
        let span = tracing::info_span!(
            "rotation_step",
            %secret_id,
            %request_token,
            %phase,
            attempt_id = %attempt.id,
        );

        async {
            let outcome = self.drive(&mut attempt, &[phase]).await;
            deliver_outcome(self.sink.as_ref(), &outcome, &self.config.retry).await;
            outcome
        }
        .instrument(span)
        .await
    }

    /// Dispatch a trigger event: one step, or the full cycle without one
    pub async fn handle(&self, event: &RotationEvent) -> RotationOutcome {
        match event.step {
            Some(step) => {
                self.run_step(&event.secret_id, &event.request_token, step.phase())
                    .await
            }
            None => self.rotate(&event.secret_id, &event.request_token).await,
        }
    }

    async fn drive(&self, attempt: &mut RotationAttempt, phases: &[Phase]) -> RotationOutcome {
        let secret_id = attempt.secret_id.clone();
        let request_token = attempt.request_token.clone();

        for &phase in phases {
            let result = retry_with_backoff(&self.config.retry, &phase.to_string(), || {
                self.run_phase(&secret_id, &request_token, phase)
            })
            .await;

            let error = match result {
                Ok(PhaseStatus::InProgress { holder }) => {
                    tracing::info!(%phase, %holder, "Another rotation holds PENDING");
                    return RotationOutcome::in_progress(secret_id, request_token, Some(&holder));
                }
                Ok(status) => match attempt.advance(phase) {
                    Ok(()) => {
                        tracing::info!(%phase, ?status, "Phase finished");
                        continue;
                    }
                    Err(e) => e,
                },
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    tracing::info!(%phase, error = %e, "Lost stage conflict");
                    return RotationOutcome::in_progress(
                        secret_id,
                        request_token,
                        conflict_holder(&e),
                    );
                }
                Err(e) => e,
            };

            return self.fail(attempt, phase, error);
        }

        if attempt.state == RotationState::Promoted {
            self.succeeded(&secret_id, &request_token).await
        } else {
            let last = phases.last().copied().unwrap_or(Phase::Prepare);
            RotationOutcome::step_completed(secret_id, request_token, last)
        }
    }

    fn fail(&self, attempt: &mut RotationAttempt, phase: Phase, error: RotationError) -> RotationOutcome {
        let reached = attempt.state;
        if let Err(e) = attempt.fail(phase, &error) {
            tracing::warn!(error = %e, "Could not record attempt failure");
        }

        let retry_count = match &error {
            RotationError::MaxRetriesExceeded { max_attempts, .. } => *max_attempts,
            _ => 0,
        };
        RotationErrorLog::new(
            attempt.id.to_string(),
            attempt.secret_id.clone(),
            attempt.request_token.clone(),
            &error,
        )
        .with_phase(phase)
        .with_retry_count(retry_count)
        .with_rotation_state(reached)
        .emit();

        RotationOutcome::failed(
            attempt.secret_id.clone(),
            attempt.request_token.clone(),
            phase,
            &error,
        )
    }

    /// Outcome for a promoted token, stamped from store state so a replay
    /// of the same token reports the same record
    async fn succeeded(&self, secret_id: &SecretId, request_token: &RequestToken) -> RotationOutcome {
        let version_id = request_token.version_id();
        let described = retry_with_backoff(&self.config.retry, "describe_versions", || {
            self.stages.snapshot(secret_id)
        })
        .await;

        let promoted_at = match described {
            Ok(description) => description
                .version(&version_id)
                .map(|v| v.promoted_at.unwrap_or(v.created_at)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read promotion time");
                None
            }
        };

        RotationOutcome::succeeded(
            secret_id.clone(),
            request_token.clone(),
            promoted_at.unwrap_or_else(chrono::Utc::now),
        )
    }

    async fn run_phase(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
        phase: Phase,
    ) -> RotationResult<PhaseStatus> {
        match phase {
            Phase::Prepare => self.prepare(secret_id, request_token).await,
            Phase::Apply => self.apply(secret_id, request_token).await,
            Phase::Verify => self.verify(secret_id, request_token).await,
            Phase::Promote => self.promote(secret_id, request_token).await,
        }
    }

    /// Create this token's version with a fresh password and label it PENDING
    pub async fn prepare(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<PhaseStatus> {
        let version_id = request_token.version_id();
        let description = self.stages.snapshot(secret_id).await?;
        if let Some(status) = Self::prepared_status(secret_id, &description, &version_id)? {
            return Ok(status);
        }

        let current = self.read_stage(secret_id, Stage::Current).await?;
        let payload = self.next_payload(&current.payload)?;

        match self
            .stages
            .claim_pending(secret_id, &version_id, payload)
            .await
        {
            Ok(()) => {
                tracing::info!(%secret_id, %version_id, from = %current.version_id, "Created PENDING version");
                Ok(PhaseStatus::Completed)
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                tracing::debug!(%secret_id, error = %e, "PENDING claim lost, re-reading");
                let description = self.stages.snapshot(secret_id).await?;
                match Self::prepared_status(secret_id, &description, &version_id)? {
                    Some(status) => Ok(status),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// `Some` when Prepare has nothing to do for `version_id`
    fn prepared_status(
        secret_id: &SecretId,
        description: &SecretDescription,
        version_id: &VersionId,
    ) -> RotationResult<Option<PhaseStatus>> {
        match Progress::of(description, version_id) {
            Progress::NotStarted => Ok(None),
            Progress::Pending | Progress::Promoted | Progress::Superseded => {
                Ok(Some(PhaseStatus::AlreadyDone))
            }
            Progress::Blocked(holder) => Ok(Some(PhaseStatus::InProgress { holder })),
            Progress::Abandoned => Err(RotationError::Abandoned {
                secret_id: secret_id.clone(),
                version_id: version_id.clone(),
            }),
        }
    }

    /// Copy of `current` naming the next principal, with a new password
    fn next_payload(&self, current: &Payload) -> RotationResult<Payload> {
        let credential = current.credential()?;
        let principal = self.config.strategy.next_principal(&credential.username);
        let password = self.config.password.generate()?;
        Ok(current.with_username(&principal).with_password(&password))
    }

    /// Make the consumer accept this token's PENDING credential
    pub async fn apply(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<PhaseStatus> {
        let Some((pending, description)) = self.pending_version(secret_id, request_token).await?
        else {
            return Ok(PhaseStatus::AlreadyDone);
        };
        let target = pending.payload.credential()?;

        match self.connect(&target).await {
            Ok(_) => {
                tracing::debug!(%secret_id, principal = %target.username, "PENDING credential already accepted");
                return Ok(PhaseStatus::AlreadyDone);
            }
            Err(e) if is_auth_failure(&e) => {}
            Err(e) => return Err(e),
        }

        let mut session = self.connect_with_stored(secret_id, &description).await?;
        let changed = with_timeout(
            self.config.call_timeout,
            "change_credential",
            self.consumer.change_credential(&mut session, &target),
        )
        .await;

        match changed {
            Ok(()) => {
                tracing::info!(
                    %secret_id,
                    consumer = self.consumer.name(),
                    principal = %target.username,
                    "Applied PENDING credential"
                );
                Ok(PhaseStatus::Completed)
            }
            Err(RotationError::Consumer(ConsumerError::AlreadyApplied)) => {
                Ok(PhaseStatus::AlreadyDone)
            }
            Err(e) => Err(e),
        }
    }

    /// Session authenticated with CURRENT, or PREVIOUS when CURRENT no
    /// longer works
    async fn connect_with_stored(
        &self,
        secret_id: &SecretId,
        description: &SecretDescription,
    ) -> RotationResult<C::Session> {
        let mut candidates = Vec::with_capacity(2);
        for stage in [Stage::Current, Stage::Previous] {
            if description.stages.get(stage).is_some() {
                candidates.push(self.read_stage(secret_id, stage).await?);
            }
        }

        for candidate in &candidates {
            let credential = candidate.payload.credential()?;
            match self.connect(&credential).await {
                Ok(session) => {
                    tracing::debug!(
                        %secret_id,
                        version_id = %candidate.version_id,
                        principal = %credential.username,
                        "Connected with stored credential"
                    );
                    return Ok(session);
                }
                Err(e) if is_auth_failure(&e) => {
                    tracing::warn!(
                        %secret_id,
                        version_id = %candidate.version_id,
                        "Stored credential rejected by consumer"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(RotationError::NoUsableCredential {
            secret_id: secret_id.clone(),
            consumer: self.consumer.name().to_string(),
        })
    }

    /// Authenticate with this token's PENDING credential
    pub async fn verify(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<PhaseStatus> {
        let Some((pending, _)) = self.pending_version(secret_id, request_token).await? else {
            return Ok(PhaseStatus::AlreadyDone);
        };
        let credential = pending.payload.credential()?;
        let failed = |reason: String| RotationError::VerificationFailed {
            secret_id: secret_id.clone(),
            version_id: pending.version_id.clone(),
            reason,
        };

        let mut session = match self.connect(&credential).await {
            Ok(session) => session,
            Err(e) if is_auth_failure(&e) => return Err(failed(e.to_string())),
            Err(e) => return Err(e),
        };

        if self.config.verify_ping {
            let pinged = with_timeout(
                self.config.call_timeout,
                "ping",
                self.consumer.ping(&mut session),
            )
            .await;
            match pinged {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => return Err(failed(e.to_string())),
            }
        }

        tracing::info!(%secret_id, version_id = %pending.version_id, "Verified PENDING credential");
        Ok(PhaseStatus::Completed)
    }

    /// Move CURRENT to this token's version
    pub async fn promote(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<PhaseStatus> {
        let version_id = request_token.version_id();
        let mut lost = None;

        for _ in 0..PROMOTE_CAS_ATTEMPTS {
            let description = self.stages.snapshot(secret_id).await?;
            Self::expect_pending(secret_id, request_token, &description)?;
            let Some(current) = description.stages.current() else {
                return Err(RotationError::NotInitialized {
                    secret_id: secret_id.clone(),
                });
            };
            match Progress::of(&description, &version_id) {
                Progress::Promoted | Progress::Superseded => return Ok(PhaseStatus::AlreadyDone),
                _ => {}
            }

            match self.stages.promote(secret_id, &version_id, current).await {
                Ok(()) => return Ok(PhaseStatus::Completed),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    tracing::debug!(%secret_id, error = %e, "CURRENT moved under us, re-reading");
                    lost = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(lost.unwrap_or_else(|| RotationError::Internal("promote made no attempt".to_string())))
    }

    /// Remove PENDING from this token's version so another token may start
    ///
    /// A token whose version does not hold PENDING is left alone. A promoted
    /// version cannot be abandoned.
    pub async fn abandon(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<()> {
        let version_id = request_token.version_id();
        let description = self.stages.snapshot(secret_id).await?;

        match Progress::of(&description, &version_id) {
            Progress::Pending => self.stages.release_pending(secret_id, &version_id).await,
            Progress::Promoted | Progress::Superseded => Err(RotationError::Internal(format!(
                "version {version_id} of {secret_id} was promoted and cannot be abandoned"
            ))),
            Progress::NotStarted | Progress::Blocked(_) | Progress::Abandoned => {
                tracing::debug!(%secret_id, %version_id, "Nothing to abandon");
                Ok(())
            }
        }
    }

    /// Errors unless `request_token` owns PENDING or was already promoted
    fn expect_pending(
        secret_id: &SecretId,
        request_token: &RequestToken,
        description: &SecretDescription,
    ) -> RotationResult<()> {
        let version_id = request_token.version_id();
        match Progress::of(description, &version_id) {
            Progress::Pending | Progress::Promoted | Progress::Superseded => Ok(()),
            Progress::Blocked(holder) => Err(RotationError::ConcurrentRotation {
                secret_id: secret_id.clone(),
                holder,
            }),
            Progress::NotStarted => Err(RotationError::PendingMissing {
                secret_id: secret_id.clone(),
                request_token: request_token.clone(),
            }),
            Progress::Abandoned => Err(RotationError::Abandoned {
                secret_id: secret_id.clone(),
                version_id,
            }),
        }
    }

    /// This token's PENDING version, or `None` once it has been promoted
    async fn pending_version(
        &self,
        secret_id: &SecretId,
        request_token: &RequestToken,
    ) -> RotationResult<Option<(SecretVersion, SecretDescription)>> {
        let description = self.stages.snapshot(secret_id).await?;
        Self::expect_pending(secret_id, request_token, &description)?;

        let version_id = request_token.version_id();
        if description.stages.pending() != Some(&version_id) {
            return Ok(None);
        }

        let pending = with_timeout(
            self.config.call_timeout,
            "get_version_by_id",
            self.store().get_version_by_id(secret_id, &version_id),
        )
        .await?;
        Ok(Some((pending, description)))
    }

    async fn read_stage(&self, secret_id: &SecretId, stage: Stage) -> RotationResult<SecretVersion> {
        with_timeout(
            self.config.call_timeout,
            "get_version",
            self.store().get_version(secret_id, stage),
        )
        .await
    }

    async fn connect(&self, credential: &Credential) -> RotationResult<C::Session> {
        with_timeout(
            self.config.call_timeout,
            "connect",
            self.consumer.connect(credential),
        )
        .await
    }
}
