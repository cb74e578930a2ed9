//! Store configuration, from serde or from the process environment.

use std::error::Error as StdError;
use std::str::FromStr;

use serde::Deserialize;

use registration_driver::{DeleteMatch, StoreError};

#[cfg(feature = "postgres")]
use crate::postgres::{PostgresConfig, PostgresStore};
use crate::{MemoryStore, Store};

/// Selects the backend: `memory` or `postgres`.
pub const STORE_BACKEND_ENV: &str = "STORE_BACKEND";
/// How deletes match their keys: `either` or `both`.
pub const STORE_DELETE_MATCH_ENV: &str = "STORE_DELETE_MATCH";
/// Database host.
pub const DATABASE_HOST_ENV: &str = "DATABASE_HOST";
/// Database port.
pub const DATABASE_PORT_ENV: &str = "DATABASE_PORT";
/// Database user.
pub const DATABASE_USER_ENV: &str = "DATABASE_USER";
/// Database password.
pub const DATABASE_PASSWORD_ENV: &str = "DATABASE_PASSWORD";
/// Database name.
pub const DATABASE_NAME_ENV: &str = "DATABASE_NAME";
/// Upper bound on pooled database connections.
pub const DATABASE_MAX_CONNECTIONS_ENV: &str = "DATABASE_MAX_CONNECTIONS";

/// Errors building a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The backend name is not one this crate knows.
    #[error("unknown store backend {0:?}")]
    UnknownBackend(String),

    /// The backend is known, but its cargo feature is disabled.
    #[error("store backend {0:?} is not enabled in this build")]
    BackendDisabled(&'static str),

    /// A variable was set, but could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    Invalid {
        /// The environment variable name.
        var: &'static str,
        /// The value which failed to parse.
        value: String,
        /// The parse failure.
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

/// Which store backend to build, and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum StoreConfig {
    /// Keep registrations in process memory.
    Memory {
        /// How deletes match their keys.
        #[serde(default)]
        delete_match: DeleteMatch,
    },

    /// Keep registrations in a PostgreSQL table.
    #[cfg(feature = "postgres")]
    Postgres(PostgresConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory {
            delete_match: DeleteMatch::default(),
        }
    }
}

impl StoreConfig {
    /// Connect the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Store, StoreError> {
        let store: Store = match self {
            StoreConfig::Memory { delete_match } => {
                MemoryStore::with_delete_match(delete_match).into()
            }
            #[cfg(feature = "postgres")]
            StoreConfig::Postgres(config) => PostgresStore::connect(&config).await?.into(),
        };
        tracing::info!(backend = store.name(), "registration store ready");
        Ok(store)
    }

    /// Read the configuration from the process environment.
    ///
    /// Every call reads the environment afresh; nothing is cached.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from `lookup`, which maps a variable name to
    /// its value. Unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let delete_match: DeleteMatch =
            parse_or(&lookup, STORE_DELETE_MATCH_ENV, DeleteMatch::default())?;

        let backend = lookup(STORE_BACKEND_ENV).unwrap_or_else(|| "memory".into());
        match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreConfig::Memory { delete_match }),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let defaults = PostgresConfig::default();
                Ok(StoreConfig::Postgres(PostgresConfig {
                    host: lookup(DATABASE_HOST_ENV).unwrap_or(defaults.host),
                    port: parse_or(&lookup, DATABASE_PORT_ENV, defaults.port)?,
                    user: lookup(DATABASE_USER_ENV).unwrap_or(defaults.user),
                    password: lookup(DATABASE_PASSWORD_ENV)
                        .map(Into::into)
                        .unwrap_or(defaults.password),
                    database: lookup(DATABASE_NAME_ENV).unwrap_or(defaults.database),
                    max_connections: parse_or(
                        &lookup,
                        DATABASE_MAX_CONNECTIONS_ENV,
                        defaults.max_connections,
                    )?,
                    delete_match,
                    ..defaults
                }))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(ConfigError::BackendDisabled("postgres")),
            _ => Err(ConfigError::UnknownBackend(backend)),
        }
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|err| ConfigError::Invalid {
            var,
            value,
            source: Box::new(err),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_to_memory() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn delete_match_override() {
        let config =
            StoreConfig::from_lookup(lookup(&[(STORE_DELETE_MATCH_ENV, "both")])).unwrap();
        assert_eq!(
            config,
            StoreConfig::Memory {
                delete_match: DeleteMatch::Both
            }
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[(STORE_BACKEND_ENV, "sqlite")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(name) if name == "sqlite"));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn postgres_from_env_vars() {
        let config = StoreConfig::from_lookup(lookup(&[
            (STORE_BACKEND_ENV, "postgres"),
            (DATABASE_HOST_ENV, "db.internal"),
            (DATABASE_PORT_ENV, "6543"),
            (DATABASE_PASSWORD_ENV, "hunter2"),
        ]))
        .unwrap();

        let postgres = match config {
            StoreConfig::Postgres(postgres) => postgres,
            other => panic!("expected postgres config, got {other:?}"),
        };
        assert_eq!(postgres.host, "db.internal");
        assert_eq!(postgres.port, 6543);
        assert_eq!(postgres.user, "postgres");
        assert_eq!(postgres.database, "mbop");
        assert_eq!(postgres.password.revealed(), "hunter2");
        assert_eq!(postgres.delete_match, DeleteMatch::Either);
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn invalid_port_is_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[
            (STORE_BACKEND_ENV, "postgres"),
            (DATABASE_PORT_ENV, "not-a-port"),
        ]))
        .unwrap_err();

        match err {
            ConfigError::Invalid { var, value, .. } => {
                assert_eq!(var, DATABASE_PORT_ENV);
                assert_eq!(value, "not-a-port");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn deserializes_tagged_backend() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"memory": {"delete-match": "both"}}"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::Memory {
                delete_match: DeleteMatch::Both
            }
        );
    }

    #[tokio::test]
    async fn builds_memory_store() {
        let store = StoreConfig::default().build().await.unwrap();
        assert_eq!(store.name(), "memory");
    }
}
