/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors reported by a [`CredentialConsumer`](super::CredentialConsumer)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// Consumer unreachable or refusing connections
    #[error("consumer unavailable: {0}")]
    Unavailable(String),

    /// Call did not complete in time
    #[error("consumer call timed out: {0}")]
    Timeout(String),

    /// Credential rejected
    #[error("authentication failed for principal '{principal}'")]
    AuthenticationFailed {
        /// Principal that failed to authenticate
        principal: String,
    },

    /// Session principal may not change the target's credential
    #[error("principal '{principal}' may not change the credential of '{target}': {reason}")]
    PermissionDenied {
        /// Session principal
        principal: String,
        /// Principal whose credential was to change
        target: String,
        /// Consumer message
        reason: String,
    },

    /// Target already holds the requested value
    #[error("credential already applied")]
    AlreadyApplied,

    /// Anything else the consumer reported
    #[error("consumer error: {0}")]
    Other(String),
}

impl ConsumerError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsumerError::Unavailable(_) | ConsumerError::Timeout(_))
    }

    /// Whether the consumer rejected the credential itself
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ConsumerError::AuthenticationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ConsumerError::Unavailable("refused".into()).is_transient());
        assert!(ConsumerError::Timeout("connect".into()).is_transient());
        assert!(!ConsumerError::AlreadyApplied.is_transient());
        assert!(
            !ConsumerError::AuthenticationFailed {
                principal: "app".into()
            }
            .is_transient()
        );
    }
}
