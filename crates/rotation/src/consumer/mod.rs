//! Credential consumer adapters
//!
//! A consumer is the system that authenticates principals with the rotated
//! credential. The orchestrator is written once against
//! [`CredentialConsumer`]; each target system gets its own implementation.

mod error;
mod memory;

#[cfg(feature = "consumer-postgres")]
mod postgres;

pub use error::{ConsumerError, ConsumerResult};
pub use memory::{InMemoryConsumer, InMemorySession};

#[cfg(feature = "consumer-postgres")]
pub use postgres::{PostgresConsumer, PostgresConsumerConfig};

use async_trait::async_trait;

use crate::core::Credential;

/// Capability set the orchestrator needs from a credential consumer
#[async_trait]
pub trait CredentialConsumer: Send + Sync {
    /// Authenticated connection
    type Session: Send;

    /// Short name for logs
    fn name(&self) -> &str;

    /// Open a session authenticated with `credential`
    ///
    /// A rejected credential is [`ConsumerError::AuthenticationFailed`].
    async fn connect(&self, credential: &Credential) -> ConsumerResult<Self::Session>;

    /// Set `target.username`'s credential to `target.password`
    ///
    /// The session principal may be the target itself or one allowed to
    /// manage it. Implementations report a value that is already in place
    /// as [`ConsumerError::AlreadyApplied`] when they can detect it.
    async fn change_credential(
        &self,
        session: &mut Self::Session,
        target: &Credential,
    ) -> ConsumerResult<()>;

    /// Issue a trivial round trip on the session
    async fn ping(&self, session: &mut Self::Session) -> ConsumerResult<()>;
}

#[async_trait]
impl<T: CredentialConsumer + ?Sized> CredentialConsumer for std::sync::Arc<T> {
    type Session = T::Session;

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn connect(&self, credential: &Credential) -> ConsumerResult<Self::Session> {
        (**self).connect(credential).await
    }

    async fn change_credential(
        &self,
        session: &mut Self::Session,
        target: &Credential,
    ) -> ConsumerResult<()> {
        (**self).change_credential(session, target).await
    }

    async fn ping(&self, session: &mut Self::Session) -> ConsumerResult<()> {
        (**self).ping(session).await
    }
}
