//! PostgreSQL credential consumer
//!
//! Each session is a single `PgConnection`; credentials change through
//! `ALTER ROLE ... WITH PASSWORD`. Endpoint details come from the secret
//! payload when present and from [`PostgresConsumerConfig`] otherwise.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use std::str::FromStr;

use super::{ConsumerError, ConsumerResult, CredentialConsumer};
use crate::config::ConfigError;
use crate::core::Credential;

/// Connection defaults for payloads that omit endpoint fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConsumerConfig {
    /// Host used when the payload has no `host`
    pub host: String,
    /// Port used when the payload has no `port`
    pub port: u16,
    /// Database used when the payload has no `dbname`
    pub database: String,
    /// libpq-style SSL mode (`disable`, `prefer`, `require`, `verify-full`, ...)
    pub ssl_mode: String,
}

impl Default for PostgresConsumerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            ssl_mode: "prefer".to_string(),
        }
    }
}

impl PostgresConsumerConfig {
    /// Read `STAGEHAND_PG_*` variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("STAGEHAND_PG_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("STAGEHAND_PG_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STAGEHAND_PG_PORT".into(),
                reason: format!("'{port}' is not a valid port"),
            })?;
        }
        if let Ok(database) = std::env::var("STAGEHAND_PG_DATABASE") {
            config.database = database;
        }
        if let Ok(ssl_mode) = std::env::var("STAGEHAND_PG_SSL_MODE") {
            config.ssl_mode = ssl_mode;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".into(),
                reason: "must be greater than 0".into(),
            });
        }
        self.ssl_mode()?;
        Ok(())
    }

    fn ssl_mode(&self) -> Result<PgSslMode, ConfigError> {
        PgSslMode::from_str(&self.ssl_mode).map_err(|e| ConfigError::InvalidValue {
            field: "ssl_mode".into(),
            reason: e.to_string(),
        })
    }
}

/// Authenticated PostgreSQL session
#[derive(Debug)]
pub struct PostgresSession {
    conn: PgConnection,
    principal: String,
}

/// Consumer that rotates PostgreSQL role passwords
#[derive(Debug, Clone)]
pub struct PostgresConsumer {
    config: PostgresConsumerConfig,
    ssl_mode: PgSslMode,
}

impl PostgresConsumer {
    /// Consumer with validated defaults
    pub fn new(config: PostgresConsumerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ssl_mode = config.ssl_mode()?;
        Ok(Self { config, ssl_mode })
    }

    fn options(&self, credential: &Credential) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(credential.host.as_deref().unwrap_or(&self.config.host))
            .port(credential.port.unwrap_or(self.config.port))
            .database(credential.database.as_deref().unwrap_or(&self.config.database))
            .username(&credential.username)
            .password(credential.password.expose_secret())
            .ssl_mode(self.ssl_mode)
            .application_name("stagehand")
    }
}

/// Quote an identifier: wrap in double quotes, double embedded quotes
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal: wrap in single quotes, double embedded quotes
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn classify(principal: &str, target: &str, err: sqlx::Error) -> ConsumerError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("28P01" | "28000") => ConsumerError::AuthenticationFailed {
                principal: principal.to_string(),
            },
            Some("42501") => ConsumerError::PermissionDenied {
                principal: principal.to_string(),
                target: target.to_string(),
                reason: db.message().to_string(),
            },
            // cannot_connect_now, too_many_connections, admin_shutdown
            Some("57P03" | "53300" | "57P01") => ConsumerError::Unavailable(err.to_string()),
            _ => ConsumerError::Other(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ConsumerError::Unavailable(err.to_string()),
        _ => ConsumerError::Other(err.to_string()),
    }
}

#[async_trait]
impl CredentialConsumer for PostgresConsumer {
    type Session = PostgresSession;

    fn name(&self) -> &str {
        "postgres"
    }

    #[tracing::instrument(skip_all, fields(consumer = "postgres", principal = %credential.username))]
    async fn connect(&self, credential: &Credential) -> ConsumerResult<PostgresSession> {
        let conn = PgConnection::connect_with(&self.options(credential))
            .await
            .map_err(|e| classify(&credential.username, &credential.username, e))?;
        Ok(PostgresSession {
            conn,
            principal: credential.username.clone(),
        })
    }

    #[tracing::instrument(
        skip_all,
        fields(consumer = "postgres", principal = %session.principal, target = %target.username)
    )]
    async fn change_credential(
        &self,
        session: &mut PostgresSession,
        target: &Credential,
    ) -> ConsumerResult<()> {
        let statement = format!(
            "ALTER ROLE {} WITH PASSWORD {}",
            quote_ident(&target.username),
            quote_literal(target.password.expose_secret())
        );
        let conn: &mut PgConnection = &mut session.conn;
        sqlx::Executor::execute(conn, sqlx::raw_sql(&statement))
            .await
            .map_err(|e| classify(&session.principal, &target.username, e))?;
        tracing::info!("role password changed");
        Ok(())
    }

    async fn ping(&self, session: &mut PostgresSession) -> ConsumerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&mut session.conn)
            .await
            .map_err(|e| classify(&session.principal, &session.principal, e))?;
        Ok(())
    }
}

impl PostgresSession {
    /// Close the connection cleanly
    pub async fn close(self) -> ConsumerResult<()> {
        let principal = self.principal;
        self.conn
            .close()
            .await
            .map_err(|e| classify(&principal, &principal, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quote_ident("app"), "\"app\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("p'w"), "'p''w'");
    }

    #[test]
    fn config_validation() {
        assert!(PostgresConsumerConfig::default().validate().is_ok());

        let bad_ssl = PostgresConsumerConfig {
            ssl_mode: "sometimes".into(),
            ..Default::default()
        };
        assert!(bad_ssl.validate().is_err());

        let no_port = PostgresConsumerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(no_port.validate().is_err());
    }

    #[test]
    fn io_errors_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::other("refused"));
        assert!(classify("app", "app", err).is_transient());
        assert!(classify("app", "app", sqlx::Error::PoolTimedOut).is_transient());
    }
}
