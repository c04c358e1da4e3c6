//! Validated identifiers
//!
//! Secret ids, request tokens and version ids travel into store API calls
//! and log fields, so they are checked once at the edge and carried as
//! newtypes afterwards.

use super::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Secret ids may be full ARNs
const MAX_SECRET_ID_LENGTH: usize = 2048;

const MAX_TOKEN_LENGTH: usize = 128;

/// Characters allowed besides ASCII alphanumerics (ARN and path separators)
const EXTRA_CHARS: &[char] = &['-', '_', '/', '.', ':', '+', '=', '@'];

fn validate(kind: &'static str, id: &str, max: usize) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId { kind });
    }

    if id.len() > max {
        return Err(ValidationError::InvalidId {
            kind,
            id: id.to_string(),
            reason: format!("exceeds maximum length of {max} characters"),
        });
    }

    if let Some(bad) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !EXTRA_CHARS.contains(c))
    {
        return Err(ValidationError::InvalidId {
            kind,
            id: id.to_string(),
            reason: format!("contains invalid character {bad:?}"),
        });
    }

    Ok(())
}

/// Identifier of a secret in the versioned store (name or ARN)
///
/// # Examples
///
/// ```
/// use stagehand_rotation::SecretId;
///
/// assert!(SecretId::new("prod/db/app").is_ok());
/// assert!(SecretId::new("arn:aws:secretsmanager:eu-west-1:123:secret:db-AbCd").is_ok());
/// assert!(SecretId::new("").is_err());
/// assert!(SecretId::new("db app").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretId(String);

impl SecretId {
    /// Creates a validated secret id
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate("secret id", &id, MAX_SECRET_ID_LENGTH)?;
        Ok(Self(id))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Client-supplied idempotency key for one rotation cycle
///
/// Every phase invoked with the same `(secret, token)` pair converges on the
/// same store state. The token doubles as the id of the version the cycle
/// creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestToken(String);

impl RequestToken {
    /// Creates a validated request token
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into();
        validate("request token", &token, MAX_TOKEN_LENGTH)?;
        Ok(Self(token))
    }

    /// Generates a fresh random token for schedulers that do not supply one
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the version this rotation cycle creates
    pub fn version_id(&self) -> VersionId {
        VersionId(self.0.clone())
    }
}

/// Identifier of one version of a secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Creates a validated version id
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate("version id", &id, MAX_TOKEN_LENGTH)?;
        Ok(Self(id))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_impls {
    ($($ty:ident),+) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                $ty::new(s)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ty::new(s)
            }
        }
    )+};
}

string_newtype_impls!(SecretId, RequestToken, VersionId);
