//! Connection pool bootstrap for SQLite.
//!
//! # Responsibility
//! - Build file or in-memory pools capped at the configured size.
//! - Configure every pooled connection with the pragmas core relies on.
//!
//! # Invariants
//! - Pooled connections have `foreign_keys=ON` and a busy timeout.
//! - Pooled connections expose `unicode_lower`, so search folds case the same
//!   way in SQL and in Rust.
//! - File databases run in WAL mode so readers never block each other.
//! - In-memory pools hold exactly one long-lived connection, because each
//!   SQLite memory connection is its own database.
//!
//! # See also
//! - crate::db::migrations

use super::{ConnectionPool, DbResult};
use crate::config::{DbConfig, DbTarget};
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Builds the connection pool described by `config`.
///
/// The pool is not migrated here; `SqliteBookRepository::open` runs the
/// schema manager before handing out any store operation.
///
/// # Side effects
/// - Creates the parent directory of a file database when missing.
/// - Emits `db_open` logging events with duration and status.
pub fn open_pool(config: &DbConfig) -> DbResult<ConnectionPool> {
    let started_at = Instant::now();
    let mode = match config.target {
        DbTarget::File(_) => "file",
        DbTarget::Memory => "memory",
    };
    info!(
        "event=db_open module=db status=start mode={} target={} max_size={}",
        mode,
        config.target.describe(),
        config.pool_max_size
    );

    let result = match &config.target {
        DbTarget::File(path) => build_file_pool(path, config),
        DbTarget::Memory => build_memory_pool(config),
    };

    match result {
        Ok(pool) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(pool)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Builds a single-connection pool over a private in-memory database.
pub fn open_pool_in_memory() -> DbResult<ConnectionPool> {
    open_pool(&DbConfig::in_memory())
}

fn build_file_pool(path: &Path, config: &DbConfig) -> DbResult<ConnectionPool> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(path)
        .with_init(move |conn| configure_connection(conn, busy_timeout, true));

    let pool = r2d2::Pool::builder()
        .max_size(config.pool_max_size)
        .connection_timeout(config.connect_timeout)
        .build(manager)?;
    Ok(pool)
}

fn build_memory_pool(config: &DbConfig) -> DbResult<ConnectionPool> {
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::memory()
        .with_init(move |conn| configure_connection(conn, busy_timeout, false));

    let pool = r2d2::Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(config.connect_timeout)
        .build(manager)?;
    Ok(pool)
}

/// SQL name of the Unicode-aware lowercase function.
pub const UNICODE_LOWER_FN: &str = "unicode_lower";

/// Registers the scalar functions core queries rely on.
///
/// SQLite's built-in `lower()` folds ASCII only; `unicode_lower` applies
/// `str::to_lowercase` and passes NULL through.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        UNICODE_LOWER_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text = ctx.get::<Option<String>>(0)?;
            Ok(text.map(|text| text.to_lowercase()))
        },
    )
}

fn configure_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    wal: bool,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    register_functions(conn)?;
    if wal {
        // journal_mode answers with the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_row| Ok(()))?;
    }
    Ok(())
}
