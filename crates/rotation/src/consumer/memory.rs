//! In-memory credential consumer
//!
//! Reference [`CredentialConsumer`]: a principal table with passwords and
//! management grants, plus fault injection so rotation failure paths can be
//! driven from tests.
//!
//! With `retain_previous` enabled a principal keeps accepting its prior
//! password after a change, the dual-password behavior that makes
//! single-user rotation zero-downtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use super::{ConsumerError, ConsumerResult, CredentialConsumer};
use crate::core::Credential;

#[derive(Debug, Clone, Default)]
struct Principal {
    password: String,
    previous: Option<String>,
    manages: HashSet<String>,
}

#[derive(Debug, Default)]
struct Faults {
    down: bool,
    unavailable_calls: u32,
    corrupt_next_change: bool,
    deny_changes: bool,
}

/// Session opened by [`InMemoryConsumer::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemorySession {
    principal: String,
}

impl InMemorySession {
    /// Principal the session authenticated as
    pub fn principal(&self) -> &str {
        &self.principal
    }
}

/// Consumer held in memory
#[derive(Debug)]
pub struct InMemoryConsumer {
    principals: Mutex<HashMap<String, Principal>>,
    faults: Mutex<Faults>,
    retain_previous: bool,
    latency: Option<Duration>,
    gate: watch::Sender<bool>,
    changes: AtomicU32,
}

impl Default for InMemoryConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConsumer {
    /// Consumer with no principals
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            principals: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            retain_previous: false,
            latency: None,
            gate,
            changes: AtomicU32::new(0),
        }
    }

    /// Keep accepting a principal's prior password after a change
    #[must_use]
    pub fn with_retain_previous(mut self, retain: bool) -> Self {
        self.retain_previous = retain;
        self
    }

    /// Delay every connect and change by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace a principal
    #[must_use]
    pub fn with_principal(self, name: &str, password: &str) -> Self {
        self.add_principal(name, password);
        self
    }

    /// Add or replace a principal
    pub fn add_principal(&self, name: &str, password: &str) {
        self.principals.lock().insert(
            name.to_string(),
            Principal {
                password: password.to_string(),
                ..Principal::default()
            },
        );
    }

    /// Allow `manager` to change `target`'s credential
    pub fn grant_manage(&self, manager: &str, target: &str) {
        if let Some(p) = self.principals.lock().get_mut(manager) {
            p.manages.insert(target.to_string());
        }
    }

    /// Refuse every call while `down`
    pub fn set_down(&self, down: bool) {
        self.faults.lock().down = down;
    }

    /// Fail the next `calls` calls with [`ConsumerError::Unavailable`]
    pub fn fail_next(&self, calls: u32) {
        self.faults.lock().unavailable_calls = calls;
    }

    /// Store a different value than requested on the next change
    pub fn corrupt_next_change(&self) {
        self.faults.lock().corrupt_next_change = true;
    }

    /// Reject every change with [`ConsumerError::PermissionDenied`]
    pub fn set_deny_changes(&self, deny: bool) {
        self.faults.lock().deny_changes = deny;
    }

    /// Block changes until [`resume_changes`](Self::resume_changes)
    pub fn pause_changes(&self) {
        self.gate.send_replace(false);
    }

    /// Release changes blocked by [`pause_changes`](Self::pause_changes)
    pub fn resume_changes(&self) {
        self.gate.send_replace(true);
    }

    /// Password the consumer currently holds for `principal`
    pub fn password_of(&self, principal: &str) -> Option<String> {
        self.principals
            .lock()
            .get(principal)
            .map(|p| p.password.clone())
    }

    /// Whether `credential` would authenticate right now, ignoring faults
    pub fn accepts(&self, credential: &Credential) -> bool {
        let offered = credential.password.expose_secret();
        self.principals
            .lock()
            .get(&credential.username)
            .is_some_and(|p| {
                p.password == offered
                    || (self.retain_previous && p.previous.as_deref() == Some(offered))
            })
    }

    /// Number of credential changes that took effect
    pub fn change_count(&self) -> u32 {
        self.changes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> ConsumerResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut faults = self.faults.lock();
        if faults.down {
            return Err(ConsumerError::Unavailable("connection refused".to_string()));
        }
        if faults.unavailable_calls > 0 {
            faults.unavailable_calls -= 1;
            return Err(ConsumerError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialConsumer for InMemoryConsumer {
    type Session = InMemorySession;

    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, credential: &Credential) -> ConsumerResult<InMemorySession> {
        self.enter().await?;
        if self.accepts(credential) {
            Ok(InMemorySession {
                principal: credential.username.clone(),
            })
        } else {
            Err(ConsumerError::AuthenticationFailed {
                principal: credential.username.clone(),
            })
        }
    }

    async fn change_credential(
        &self,
        session: &mut InMemorySession,
        target: &Credential,
    ) -> ConsumerResult<()> {
        // Gate held open by default; the sender lives as long as self
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| ConsumerError::Other(e.to_string()))?;
        self.enter().await?;

        let (deny, corrupt) = {
            let mut faults = self.faults.lock();
            (faults.deny_changes, std::mem::take(&mut faults.corrupt_next_change))
        };

        let mut principals = self.principals.lock();
        let allowed = session.principal == target.username
            || principals
                .get(&session.principal)
                .is_some_and(|p| p.manages.contains(&target.username));
        if deny || !allowed {
            return Err(ConsumerError::PermissionDenied {
                principal: session.principal.clone(),
                target: target.username.clone(),
                reason: "insufficient privilege".to_string(),
            });
        }

        let principal = principals.get_mut(&target.username).ok_or_else(|| {
            ConsumerError::Other(format!("role \"{}\" does not exist", target.username))
        })?;

        let requested = target.password.expose_secret();
        if principal.password == requested {
            return Err(ConsumerError::AlreadyApplied);
        }

        let new_password = if corrupt {
            format!("{requested}-corrupted")
        } else {
            requested.to_string()
        };
        let old = std::mem::replace(&mut principal.password, new_password);
        principal.previous = self.retain_previous.then_some(old);
        self.changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self, _session: &mut InMemorySession) -> ConsumerResult<()> {
        if self.faults.lock().down {
            return Err(ConsumerError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(user: &str, password: &str) -> Credential {
        Credential::new(user, password)
    }

    #[tokio::test]
    async fn connect_checks_password() {
        let consumer = InMemoryConsumer::new().with_principal("app", "p1");
        assert!(consumer.connect(&cred("app", "p1")).await.is_ok());
        assert!(consumer.connect(&cred("app", "nope")).await.unwrap_err().is_auth_failure());
        assert!(consumer.connect(&cred("ghost", "p1")).await.unwrap_err().is_auth_failure());
    }

    #[tokio::test]
    async fn self_change_and_already_applied() {
        let consumer = InMemoryConsumer::new().with_principal("app", "p1");
        let mut session = consumer.connect(&cred("app", "p1")).await.unwrap();

        consumer
            .change_credential(&mut session, &cred("app", "p2"))
            .await
            .unwrap();
        assert_eq!(consumer.password_of("app").as_deref(), Some("p2"));

        let again = consumer.change_credential(&mut session, &cred("app", "p2")).await;
        assert_eq!(again, Err(ConsumerError::AlreadyApplied));
        assert_eq!(consumer.change_count(), 1);
    }

    #[tokio::test]
    async fn retained_previous_password_still_authenticates() {
        let consumer = InMemoryConsumer::new()
            .with_retain_previous(true)
            .with_principal("app", "p1");
        let mut session = consumer.connect(&cred("app", "p1")).await.unwrap();
        consumer
            .change_credential(&mut session, &cred("app", "p2"))
            .await
            .unwrap();

        assert!(consumer.accepts(&cred("app", "p1")));
        assert!(consumer.accepts(&cred("app", "p2")));
    }

    #[tokio::test]
    async fn changing_another_principal_needs_a_grant() {
        let consumer = InMemoryConsumer::new()
            .with_principal("app", "a1")
            .with_principal("app_clone", "b1");
        let mut session = consumer.connect(&cred("app", "a1")).await.unwrap();

        let denied = consumer
            .change_credential(&mut session, &cred("app_clone", "b2"))
            .await;
        assert!(matches!(denied, Err(ConsumerError::PermissionDenied { .. })));

        consumer.grant_manage("app", "app_clone");
        consumer
            .change_credential(&mut session, &cred("app_clone", "b2"))
            .await
            .unwrap();
        assert_eq!(consumer.password_of("app_clone").as_deref(), Some("b2"));
    }

    #[tokio::test]
    async fn faults_are_injected() {
        let consumer = InMemoryConsumer::new().with_principal("app", "p1");

        consumer.fail_next(1);
        assert!(consumer.connect(&cred("app", "p1")).await.unwrap_err().is_transient());
        assert!(consumer.connect(&cred("app", "p1")).await.is_ok());

        consumer.set_down(true);
        assert!(consumer.connect(&cred("app", "p1")).await.unwrap_err().is_transient());
        consumer.set_down(false);

        let mut session = consumer.connect(&cred("app", "p1")).await.unwrap();
        consumer.corrupt_next_change();
        consumer
            .change_credential(&mut session, &cred("app", "p2"))
            .await
            .unwrap();
        assert!(!consumer.accepts(&cred("app", "p2")));
    }
}
