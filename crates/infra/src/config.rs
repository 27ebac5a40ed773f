//! Configuration loading and representation.
//!
//! Settings come from environment variables, with a `.env` file in the
//! working directory filling in whatever the process environment leaves
//! unset. Parsing goes through a lookup function so tests can feed a plain
//! map instead of mutating the process environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use saldo_core::DEFAULT_STATEMENT_SIZE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

/// Env file read by [`LedgerConfig::from_env`].
pub const ENV_FILE: &str = ".env";

/// Connection settings for the Postgres backend.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl core::fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Postgres(PostgresSettings),
}

/// Knobs of the ledger engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Longest wait for an account's gate before giving up.
    pub gate_timeout: Duration,
    /// How many times a posting is re-evaluated after a balance conflict.
    pub max_commit_attempts: u32,
    /// Statement length when the caller does not specify one.
    pub statement_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gate_timeout: Duration::from_millis(5_000),
            max_commit_attempts: 3,
            statement_size: DEFAULT_STATEMENT_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub bind_addr: SocketAddr,
    pub backend: StorageBackend,
    pub engine: EngineSettings,
    /// Create the reference accounts at startup.
    pub seed: bool,
}

impl LedgerConfig {
    /// Load from the process environment, falling back to [`ENV_FILE`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_and_file(Path::new(ENV_FILE))
    }

    /// Process environment first, then the dotenv-formatted `path` if it exists.
    pub fn from_env_and_file(path: &Path) -> Result<Self, ConfigError> {
        let file = read_env_file(path)?;
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineSettings::default();

        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let backend = match lookup("LEDGER_BACKEND")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("memory") | Some("in_memory") => StorageBackend::InMemory,
            Some("postgres") => StorageBackend::Postgres(PostgresSettings {
                host: required(&lookup, "POSTGRES_HOST")?,
                port: parse_or(&lookup, "POSTGRES_PORT", 5432)?,
                database: required(&lookup, "POSTGRES_DB")?,
                user: required(&lookup, "POSTGRES_USER")?,
                password: required(&lookup, "POSTGRES_PASSWORD")?,
                max_connections: at_least(&lookup, "POSTGRES_MAX_CONNECTIONS", 10, 1)?,
            }),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LEDGER_BACKEND",
                    value: other.to_string(),
                    reason: "expected memory or postgres".to_string(),
                });
            }
        };

        let gate_timeout_ms: u64 = parse_or(
            &lookup,
            "LEDGER_GATE_TIMEOUT_MS",
            defaults.gate_timeout.as_millis() as u64,
        )?;

        let engine = EngineSettings {
            gate_timeout: Duration::from_millis(gate_timeout_ms),
            max_commit_attempts: at_least(
                &lookup,
                "LEDGER_COMMIT_ATTEMPTS",
                defaults.max_commit_attempts,
                1,
            )?,
            statement_size: at_least(&lookup, "LEDGER_STATEMENT_SIZE", defaults.statement_size, 1)?,
        };

        let seed = match lookup("LEDGER_SEED") {
            None => true,
            Some(v) => parse_flag("LEDGER_SEED", &v)?,
        };

        Ok(Self {
            bind_addr,
            backend,
            engine,
            seed,
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_file_error = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    match dotenvy::from_path_iter(path) {
        Ok(entries) => entries
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(env_file_error),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(e) => Err(env_file_error(e)),
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn at_least<F, T>(lookup: &F, key: &'static str, default: T, min: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + core::fmt::Display + Copy,
    T::Err: core::fmt::Display,
{
    let value = parse_or(lookup, key, default)?;
    if value < min {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be at least {min}"),
        });
    }
    Ok(value)
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
