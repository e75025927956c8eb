//! Schema manager for the `books` table.
//!
//! # Responsibility
//! - Converge a fresh database, or one left by the single-source layout
//!   (`book_id INTEGER PRIMARY KEY`, no `source`), to the current shape.
//! - Keep every step independently idempotent so repeated startups are no-ops.
//!
//! # Invariants
//! - Steps run in a fixed order inside one `IMMEDIATE` transaction; a failed
//!   step rolls back the whole run.
//! - NOT NULL and uniqueness on `(source, book_id)` are only introduced after
//!   the legacy backfill has given every row a source.
//! - Existing rows are never dropped; the table rebuild copies every row.
//!
//! # See also
//! - crate::db::open

use crate::config::{ConfigError, DbConfig, DEFAULT_LEGACY_SOURCE, ENV_LEGACY_SOURCE};
use crate::db::{DbError, DbResult};
use crate::model::book::SourceId;
use log::{debug, error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

pub const BOOKS_TABLE: &str = "books";
pub const IDENTITY_INDEX: &str = "books_source_book_id_key";
pub const TITLE_INDEX: &str = "books_title_lower_idx";
pub const AUTHOR_INDEX: &str = "books_author_lower_idx";

const REBUILD_TABLE: &str = "books_next";

/// Current time as Unix epoch milliseconds, evaluated by SQLite.
pub(crate) const NOW_MS_SQL: &str =
    "CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER)";

pub(crate) const DESCRIPTIVE_COLUMNS: &[&str] = &[
    "title",
    "author",
    "illustrator",
    "release_date",
    "language",
    "category",
    "original_publication",
    "credits",
    "copyright_status",
    "downloads",
];

const NOT_NULL_COLUMNS: &[&str] = &["source", "book_id", "url", "files"];

/// Inputs that steps need beyond the connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Source assigned to rows that predate multi-source support.
    pub legacy_source: String,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            legacy_source: DEFAULT_LEGACY_SOURCE.to_string(),
        }
    }
}

impl SchemaOptions {
    pub fn from_config(config: &DbConfig) -> Self {
        Self {
            legacy_source: config.legacy_source.clone(),
        }
    }
}

/// Names of the steps that actually ran, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub applied: Vec<&'static str>,
}

impl SchemaReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Clone, Copy)]
struct SchemaStep {
    name: &'static str,
    needed: fn(&Connection) -> rusqlite::Result<bool>,
    apply: fn(&Connection, &SchemaOptions) -> rusqlite::Result<()>,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        name: "create_books_table",
        needed: books_table_missing,
        apply: create_books_table,
    },
    SchemaStep {
        name: "add_source_column",
        needed: source_column_missing,
        apply: add_source_column,
    },
    SchemaStep {
        name: "backfill_legacy_source",
        needed: rows_without_source,
        apply: backfill_legacy_source,
    },
    SchemaStep {
        name: "rebuild_with_surrogate_key",
        needed: surrogate_key_missing,
        apply: rebuild_with_surrogate_key,
    },
    SchemaStep {
        name: "add_identity_unique_index",
        needed: identity_index_missing,
        apply: add_identity_unique_index,
    },
    SchemaStep {
        name: "add_title_search_index",
        needed: title_index_missing,
        apply: add_title_search_index,
    },
    SchemaStep {
        name: "add_author_search_index",
        needed: author_index_missing,
        apply: add_author_search_index,
    },
];

/// Returns the ordered step names known by this binary.
pub fn step_names() -> Vec<&'static str> {
    STEPS.iter().map(|step| step.name).collect()
}

/// Brings the `books` table to the current shape.
///
/// Safe to call on every process start. Returns the steps that ran; an empty
/// report means the database was already current.
///
/// # Errors
/// - `DbError::Migration` naming the step that failed.
/// - `DbError::SchemaMismatch` when the converged table still does not have
///   the expected shape (e.g. conflicting manual changes).
pub fn ensure_schema(conn: &mut Connection, options: &SchemaOptions) -> DbResult<SchemaReport> {
    let started_at = Instant::now();
    match run_steps(conn, options) {
        Ok(report) => {
            info!(
                "event=schema_ensure module=db status=ok applied={} duration_ms={}",
                report.applied.len(),
                started_at.elapsed().as_millis()
            );
            Ok(report)
        }
        Err(err) => {
            error!(
                "event=schema_ensure module=db status=error duration_ms={} error_code=schema_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn run_steps(conn: &mut Connection, options: &SchemaOptions) -> DbResult<SchemaReport> {
    SourceId::parse(&options.legacy_source).map_err(|_| ConfigError::InvalidValue {
        key: ENV_LEGACY_SOURCE,
        value: options.legacy_source.clone(),
        reason: "legacy source must be a valid source id",
    })?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut report = SchemaReport::default();
    let step_conn: &Connection = &tx;

    for step in STEPS {
        let needed = (step.needed)(step_conn).map_err(|source| DbError::Migration {
            step: step.name,
            source,
        })?;
        if !needed {
            debug!(
                "event=schema_step module=db status=skipped step={}",
                step.name
            );
            continue;
        }

        (step.apply)(step_conn, options).map_err(|source| DbError::Migration {
            step: step.name,
            source,
        })?;
        info!(
            "event=schema_step module=db status=applied step={}",
            step.name
        );
        report.applied.push(step.name);
    }

    verify_books_shape(step_conn)?;
    tx.commit()?;
    Ok(report)
}

fn books_table_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!table_exists(conn, BOOKS_TABLE)?)
}

fn create_books_table(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    conn.execute_batch(&create_books_table_sql(BOOKS_TABLE))
}

fn source_column_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!table_has_column(conn, BOOKS_TABLE, "source")?)
}

fn add_source_column(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    conn.execute_batch("ALTER TABLE books ADD COLUMN source TEXT;")
}

fn rows_without_source(conn: &Connection) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM books WHERE source IS NULL OR trim(source) = ''
        );",
        [],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn backfill_legacy_source(conn: &Connection, options: &SchemaOptions) -> rusqlite::Result<()> {
    let updated = conn.execute(
        "UPDATE books SET source = ?1 WHERE source IS NULL OR trim(source) = '';",
        [options.legacy_source.as_str()],
    )?;
    info!(
        "event=schema_backfill module=db status=ok source={} rows={}",
        options.legacy_source, updated
    );
    Ok(())
}

fn surrogate_key_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!table_has_column(conn, BOOKS_TABLE, "id")?)
}

fn identity_index_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!index_exists(conn, IDENTITY_INDEX)?)
}

fn add_identity_unique_index(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS books_source_book_id_key ON books(source, book_id);",
    )
}

fn title_index_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!index_exists(conn, TITLE_INDEX)?)
}

fn add_title_search_index(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS books_title_lower_idx ON books(lower(title));")
}

fn author_index_missing(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!index_exists(conn, AUTHOR_INDEX)?)
}

fn add_author_search_index(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS books_author_lower_idx ON books(lower(author));",
    )
}

fn create_books_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            book_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            author TEXT,
            illustrator TEXT,
            release_date TEXT,
            language TEXT,
            category TEXT,
            original_publication TEXT,
            credits TEXT,
            copyright_status TEXT,
            downloads TEXT,
            files TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(files)),
            created_at INTEGER NOT NULL DEFAULT ({NOW_MS_SQL}),
            updated_at INTEGER NOT NULL DEFAULT ({NOW_MS_SQL})
        );"
    )
}

/// Rebuilds the legacy table around a surrogate key.
///
/// SQLite cannot swap a primary key in place, so rows are copied into a
/// table of the current shape. The copy widens `book_id` to text, enforces
/// NOT NULL on identity, and normalizes `files` and timestamps.
fn rebuild_with_surrogate_key(conn: &Connection, _options: &SchemaOptions) -> rusqlite::Result<()> {
    let columns = table_columns(conn, BOOKS_TABLE)?;
    let has = |name: &str| columns.iter().any(|column| column.name == name);

    for required in ["source", "book_id", "url"] {
        if !has(required) {
            return Err(rusqlite::Error::InvalidColumnName(format!(
                "{BOOKS_TABLE}.{required}"
            )));
        }
    }

    let mut targets = vec!["source", "book_id", "url"];
    let mut selects = vec![
        "source".to_string(),
        "CAST(book_id AS TEXT)".to_string(),
        "url".to_string(),
    ];

    for &column in DESCRIPTIVE_COLUMNS {
        targets.push(column);
        selects.push(if has(column) {
            format!("CAST({column} AS TEXT)")
        } else {
            "NULL".to_string()
        });
    }

    targets.push("files");
    selects.push(if has("files") {
        "COALESCE(files, '[]')".to_string()
    } else {
        "'[]'".to_string()
    });

    let created = timestamp_expr(has("created_at").then_some("created_at"));
    let updated = timestamp_expr(has("updated_at").then_some("updated_at"));
    targets.push("created_at");
    selects.push(created.clone());
    targets.push("updated_at");
    selects.push(format!("MAX({updated}, {created})"));

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {REBUILD_TABLE};"))?;
    conn.execute_batch(&create_books_table_sql(REBUILD_TABLE))?;
    let copied = conn.execute(
        &format!(
            "INSERT INTO {REBUILD_TABLE} ({}) SELECT {} FROM {BOOKS_TABLE} ORDER BY rowid;",
            targets.join(", "),
            selects.join(", ")
        ),
        [],
    )?;
    conn.execute_batch(&format!(
        "DROP TABLE {BOOKS_TABLE};
         ALTER TABLE {REBUILD_TABLE} RENAME TO {BOOKS_TABLE};"
    ))?;

    info!(
        "event=schema_rebuild module=db status=ok table={} rows={}",
        BOOKS_TABLE, copied
    );
    Ok(())
}

/// Converts integer, real or text timestamps into epoch milliseconds.
fn timestamp_expr(column: Option<&str>) -> String {
    match column {
        Some(column) => format!(
            "COALESCE(
                CASE typeof({column})
                    WHEN 'integer' THEN {column}
                    WHEN 'real' THEN CAST({column} AS INTEGER)
                    WHEN 'text' THEN CAST(ROUND((julianday({column}) - 2440587.5) * 86400000.0) AS INTEGER)
                    ELSE NULL
                END,
                {NOW_MS_SQL}
            )"
        ),
        None => NOW_MS_SQL.to_string(),
    }
}

fn verify_books_shape(conn: &Connection) -> DbResult<()> {
    let columns = table_columns(conn, BOOKS_TABLE)?;
    let find = |name: &str| columns.iter().find(|column| column.name == name);

    let mut required = vec!["id", "source", "book_id", "url", "files", "created_at", "updated_at"];
    required.extend_from_slice(DESCRIPTIVE_COLUMNS);
    for name in required {
        if find(name).is_none() {
            return Err(DbError::SchemaMismatch(format!("missing column `{name}`")));
        }
    }

    for &name in NOT_NULL_COLUMNS {
        if !find(name).is_some_and(|column| column.not_null) {
            return Err(DbError::SchemaMismatch(format!(
                "column `{name}` must be NOT NULL"
            )));
        }
    }

    let primary_key = columns
        .iter()
        .filter(|column| column.pk_position > 0)
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    if primary_key != ["id"] {
        return Err(DbError::SchemaMismatch(format!(
            "primary key must be (id), found ({})",
            primary_key.join(", ")
        )));
    }

    if !has_unique_index_on(conn, BOOKS_TABLE, &["source", "book_id"])? {
        return Err(DbError::SchemaMismatch(
            "missing unique index on (source, book_id)".to_string(),
        ));
    }

    Ok(())
}

struct ColumnInfo {
    name: String,
    not_null: bool,
    pk_position: i64,
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(ColumnInfo {
            name: row.get("name")?,
            not_null: row.get::<_, i64>("notnull")? == 1,
            pk_position: row.get("pk")?,
        });
    }
    Ok(columns)
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|current| current.name == column))
}

fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'index' AND name = ?1
        );",
        [index],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn has_unique_index_on(conn: &Connection, table: &str, columns: &[&str]) -> rusqlite::Result<bool> {
    let mut list = conn.prepare(&format!("PRAGMA index_list({table});"))?;
    let unique_indexes = list
        .query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("unique")?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (name, unique) in unique_indexes {
        if unique != 1 {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{name}\");"))?;
        let indexed = info
            .query_map([], |row| row.get::<_, Option<String>>("name"))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let matches = indexed.len() == columns.len()
            && indexed
                .iter()
                .zip(columns)
                .all(|(indexed, expected)| indexed.as_deref() == Some(*expected));
        if matches {
            return Ok(true);
        }
    }

    Ok(false)
}
