//! SQLite storage bootstrap and schema management entry points.
//!
//! # Responsibility
//! - Build the shared, size-capped connection pool.
//! - Bring the `books` table to its current shape before any store access.
//!
//! # Invariants
//! - Schema convergence is driven by per-step existence checks, not by a
//!   stored version number.
//! - Core code must not read/write book data before `ensure_schema` succeeds.

use crate::config::ConfigError;
use r2d2_sqlite::SqliteConnectionManager;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_pool, open_pool_in_memory, register_functions, UNICODE_LOWER_FN};

/// Shared pool handed to the repository at construction.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
    Io(std::io::Error),
    Config(ConfigError),
    Migration {
        step: &'static str,
        source: rusqlite::Error,
    },
    SchemaMismatch(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "connection pool error: {err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Migration { step, source } => {
                write!(f, "schema step `{step}` failed: {source}")
            }
            Self::SchemaMismatch(message) => write!(f, "unexpected books schema: {message}"),
        }
    }
}

// Variants render their inner error, so `source` skips one level.
impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => err.source(),
            Self::Io(err) => err.source(),
            Self::Config(err) => err.source(),
            Self::Pool(_) | Self::Migration { .. } | Self::SchemaMismatch(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ConfigError> for DbError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}
