use crate::core::{Stage, ValidationError, VersionId};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`SecretStore`](super::SecretStore)
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Secret, stage or version does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Compare-and-swap lost: the label moved since it was read
    #[error(
        "stage {stage} conflict: expected {}, found {}",
        display_holder(.expected),
        display_holder(.actual)
    )]
    Conflict {
        /// Label the caller tried to move
        stage: Stage,
        /// Holder the caller observed
        expected: Option<VersionId>,
        /// Holder the store has now
        actual: Option<VersionId>,
    },

    /// Version id already used for a different value
    #[error("version {0} already exists with a different payload")]
    VersionExists(VersionId),

    /// Request rejected as invalid (for example clearing CURRENT)
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Caller lacks rights on the secret
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Store unreachable, throttled or failing internally
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be decoded
    #[error("stored payload is malformed: {0}")]
    Malformed(#[from] ValidationError),
}

fn display_holder(holder: &Option<VersionId>) -> String {
    holder
        .as_ref()
        .map_or_else(|| "<none>".to_string(), ToString::to_string)
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Whether this is a lost compare-and-swap
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::VersionExists(_))
    }
}
