//! Environment-style configuration for the metadata store.
//!
//! # Responsibility
//! - Resolve the database target and pool limits from `KEY=value` settings.
//! - Provide local defaults so a bare checkout runs without setup.
//!
//! # Invariants
//! - `DATABASE_URL`, when set, takes precedence over the individual parts.
//! - Numeric limits are validated here, not at pool construction time.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_DIR: &str = "BOOGLE_DB_DIR";
pub const ENV_DB_NAME: &str = "BOOGLE_DB_NAME";
pub const ENV_POOL_MAX_SIZE: &str = "BOOGLE_POOL_MAX_SIZE";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BOOGLE_CONNECT_TIMEOUT_MS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "BOOGLE_BUSY_TIMEOUT_MS";
pub const ENV_OPERATION_TIMEOUT_MS: &str = "BOOGLE_OPERATION_TIMEOUT_MS";
pub const ENV_LEGACY_SOURCE: &str = "BOOGLE_LEGACY_SOURCE";

const DEFAULT_DB_DIR: &str = "data";
const DEFAULT_DB_NAME: &str = "boogle";
const DB_FILE_EXTENSION: &str = "sqlite3";
const DEFAULT_POOL_MAX_SIZE: u32 = 8;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;

/// Source value assigned to rows written before multi-source support.
pub const DEFAULT_LEGACY_SOURCE: &str = "gutenberg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    UnsupportedUrl(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid value `{value}` for {key}: {reason}")
            }
            Self::UnsupportedUrl(url) => write!(
                f,
                "unsupported database url `{url}`; expected sqlite:<path>, sqlite::memory: or a file path"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    File(PathBuf),
    Memory,
}

impl DbTarget {
    /// Parses a single full connection string.
    pub fn parse_url(raw: &str) -> Result<Self, ConfigError> {
        let url = raw.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: ENV_DATABASE_URL,
                value: raw.to_string(),
                reason: "must not be empty",
            });
        }

        if matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
            return Ok(Self::Memory);
        }

        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if let Some(rest) = url.strip_prefix("file:") {
            rest
        } else if url.contains("://") {
            return Err(ConfigError::UnsupportedUrl(url.to_string()));
        } else {
            url
        };

        // Query parameters such as `?mode=rwc` carry no meaning for a plain path.
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() {
            return Err(ConfigError::UnsupportedUrl(url.to_string()));
        }

        Ok(Self::File(PathBuf::from(path)))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory => ":memory:".to_string(),
        }
    }
}

/// Resolved database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub target: DbTarget,
    pub pool_max_size: u32,
    /// Pool checkout wait used when an operation has no deadline.
    pub connect_timeout: Duration,
    pub busy_timeout: Duration,
    /// Default per-operation deadline applied by `BookService`.
    pub operation_timeout: Duration,
    pub legacy_source: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            target: DbTarget::File(default_db_path(DEFAULT_DB_DIR, DEFAULT_DB_NAME)),
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            legacy_source: DEFAULT_LEGACY_SOURCE.to_string(),
        }
    }
}

impl DbConfig {
    /// Configuration backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            target: DbTarget::Memory,
            ..Self::default()
        }
    }

    /// Configuration backed by the given database file.
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: DbTarget::File(path.into()),
            ..Self::default()
        }
    }

    /// Resolves configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let target = match get(ENV_DATABASE_URL) {
            Some(url) => DbTarget::parse_url(&url)?,
            None => {
                let dir = get(ENV_DB_DIR).unwrap_or_else(|| DEFAULT_DB_DIR.to_string());
                let name = get(ENV_DB_NAME).unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
                DbTarget::File(default_db_path(dir.trim(), name.trim()))
            }
        };

        let pool_max_size = match get(ENV_POOL_MAX_SIZE) {
            Some(value) => parse_positive(ENV_POOL_MAX_SIZE, &value)?,
            None => DEFAULT_POOL_MAX_SIZE,
        };

        Ok(Self {
            target,
            pool_max_size,
            connect_timeout: parse_millis(
                ENV_CONNECT_TIMEOUT_MS,
                get(ENV_CONNECT_TIMEOUT_MS),
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?,
            busy_timeout: parse_millis(
                ENV_BUSY_TIMEOUT_MS,
                get(ENV_BUSY_TIMEOUT_MS),
                DEFAULT_BUSY_TIMEOUT_MS,
            )?,
            operation_timeout: parse_millis(
                ENV_OPERATION_TIMEOUT_MS,
                get(ENV_OPERATION_TIMEOUT_MS),
                DEFAULT_OPERATION_TIMEOUT_MS,
            )?,
            legacy_source: get(ENV_LEGACY_SOURCE)
                .map(|value| value.trim().to_lowercase())
                .unwrap_or_else(|| DEFAULT_LEGACY_SOURCE.to_string()),
        })
    }
}

fn default_db_path(dir: &str, name: &str) -> PathBuf {
    PathBuf::from(dir).join(format!("{name}.{DB_FILE_EXTENSION}"))
}

fn parse_positive(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(parsed) if parsed >= 1 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected an integer >= 1",
        }),
    }
}

fn parse_millis(
    key: &'static str,
    value: Option<String>,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_millis(default_ms));
    };
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed >= 1 => Ok(Duration::from_millis(parsed)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected milliseconds >= 1",
        }),
    }
}
