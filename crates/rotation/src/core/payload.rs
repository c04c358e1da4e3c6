//! Secret payload and the credential view consumers read from it

use super::ValidationError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field rotated by every cycle
pub const PASSWORD_FIELD: &str = "password";
/// Principal name
pub const USERNAME_FIELD: &str = "username";

/// Structured secret value stored in one version
///
/// Fields other than those a consumer needs are carried through rotation
/// untouched. Deriving a new payload always copies.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ValidationError::MalformedPayload {
                field: "<root>".to_string(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Parse a secret string as stored by the secret store
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ValidationError::MalformedPayload {
                field: "<root>".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_value(value)
    }

    /// Serialize back to the store's string form
    pub fn to_secret_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// String field, if present and a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Principal named by this payload
    pub fn username(&self) -> Option<&str> {
        self.get_str(USERNAME_FIELD)
    }

    /// Copy with the password replaced
    #[must_use]
    pub fn with_password(&self, password: &str) -> Self {
        self.with_field(PASSWORD_FIELD, Value::String(password.to_string()))
    }

    /// Copy with the principal replaced
    #[must_use]
    pub fn with_username(&self, username: &str) -> Self {
        self.with_field(USERNAME_FIELD, Value::String(username.to_string()))
    }

    /// Copy with `field` set to `value`
    #[must_use]
    pub fn with_field(&self, field: &str, value: Value) -> Self {
        let mut map = self.0.clone();
        map.insert(field.to_string(), value);
        Self(map)
    }

    /// Extract the connection credential
    ///
    /// `username` and `password` are required. `port` may be a number or a
    /// numeric string. The database name is read from `dbname`, then
    /// `database`.
    pub fn credential(&self) -> Result<Credential, ValidationError> {
        let username = self
            .username()
            .ok_or_else(|| missing(USERNAME_FIELD))?
            .to_string();
        let password = self
            .get_str(PASSWORD_FIELD)
            .ok_or_else(|| missing(PASSWORD_FIELD))?;

        let port = match self.0.get("port") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| bad_port(&n.to_string()))?,
            ),
            Some(Value::String(s)) => Some(s.parse::<u16>().map_err(|_| bad_port(s))?),
            Some(other) => return Err(bad_port(&other.to_string())),
        };

        Ok(Credential {
            username,
            password: SecretString::from(password.to_string()),
            host: self.get_str("host").map(str::to_string),
            port,
            database: self
                .get_str("dbname")
                .or_else(|| self.get_str("database"))
                .map(str::to_string),
        })
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if key == PASSWORD_FIELD {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MalformedPayload {
        field: field.to_string(),
        reason: "required string field is missing".to_string(),
    }
}

fn bad_port(raw: &str) -> ValidationError {
    ValidationError::MalformedPayload {
        field: "port".to_string(),
        reason: format!("'{raw}' is not a valid port"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Connection credential for a consumer
#[derive(Debug, Clone)]
pub struct Credential {
    /// Principal to authenticate as
    pub username: String,
    /// Secret value
    pub password: SecretString,
    /// Endpoint host, when the payload carries one
    pub host: Option<String>,
    /// Endpoint port
    pub port: Option<u16>,
    /// Database to connect to
    pub database: Option<String>,
}

impl Credential {
    /// Username/password credential without endpoint details
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            host: None,
            port: None,
            database: None,
        }
    }

    /// Whether two credentials carry the same password
    pub fn same_password(&self, other: &Credential) -> bool {
        self.password.expose_secret() == other.password.expose_secret()
    }
}
