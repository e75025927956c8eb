//! Book metadata store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide idempotent upsert, point lookup and substring search over
//!   `books`, keyed by `(source, book_id)`.
//! - Own the connection pool and its lifecycle.
//!
//! # Invariants
//! - Write paths validate the record before any SQL runs.
//! - Upsert is a single `INSERT ... ON CONFLICT DO UPDATE` statement; callers
//!   never read-then-write.
//! - Every operation holds exactly one pooled connection and returns it on
//!   every exit path.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::config::DbConfig;
use crate::db::migrations::{self, SchemaOptions, SchemaReport, NOW_MS_SQL};
use crate::db::{open_pool, ConnectionPool, DbError};
use crate::model::book::{BookId, BookRecord, BookValidationError, FileDescriptor, SourceId, StoredBook};
use crate::repo::context::{CallContext, Interruption};
use crate::search::substring::{self, SearchHit, SearchQuery};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// SQLite VM instructions between two interruption checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

const BOOK_SELECT_SQL: &str = "SELECT
    source,
    book_id,
    url,
    title,
    author,
    illustrator,
    release_date,
    language,
    category,
    original_publication,
    credits,
    copyright_status,
    downloads,
    files,
    created_at,
    updated_at
FROM books";

static UPSERT_SQL: Lazy<String> = Lazy::new(|| {
    format!(
        "INSERT INTO books (
            source,
            book_id,
            url,
            title,
            author,
            illustrator,
            release_date,
            language,
            category,
            original_publication,
            credits,
            copyright_status,
            downloads,
            files,
            created_at,
            updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
            {NOW_MS_SQL}, {NOW_MS_SQL}
        )
        ON CONFLICT (source, book_id) DO UPDATE SET
            url = excluded.url,
            title = excluded.title,
            author = excluded.author,
            illustrator = excluded.illustrator,
            release_date = excluded.release_date,
            language = excluded.language,
            category = excluded.category,
            original_publication = excluded.original_publication,
            credits = excluded.credits,
            copyright_status = excluded.copyright_status,
            downloads = excluded.downloads,
            files = excluded.files,
            updated_at = MAX(excluded.updated_at, COALESCE(books.updated_at, 0) + 1);"
    )
});

pub type RepoResult<T> = Result<T, RepoError>;

/// Coarse classification callers use to choose between retry and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input was rejected before any I/O.
    Validation,
    /// Backend unreachable, busy, or pool exhausted.
    Connectivity,
    /// Deadline exceeded or caller cancelled.
    Timeout,
    /// Schema could not be brought to the current shape.
    Schema,
    /// Invalid connection settings.
    Configuration,
    /// Statement failed for a non-transient reason.
    Storage,
    /// Repository was closed.
    Closed,
    /// Persisted row does not decode into a valid record.
    InvalidData,
}

/// Repository error for book persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(BookValidationError),
    InvalidQuery(String),
    Db(DbError),
    Timeout { operation: &'static str },
    Cancelled { operation: &'static str },
    Closed,
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidQuery(_) => ErrorKind::Validation,
            Self::Timeout { .. } | Self::Cancelled { .. } => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
            Self::InvalidData(_) => ErrorKind::InvalidData,
            Self::Db(err) => match err {
                DbError::Pool(_) | DbError::Io(_) => ErrorKind::Connectivity,
                DbError::Config(_) => ErrorKind::Configuration,
                DbError::Migration { .. } | DbError::SchemaMismatch(_) => ErrorKind::Schema,
                DbError::Sqlite(err) => match err.sqlite_error_code() {
                    Some(
                        ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure,
                    ) => ErrorKind::Connectivity,
                    _ => ErrorKind::Storage,
                },
            },
        }
    }

    /// Whether the same call may succeed if retried later.
    ///
    /// The repository never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity | ErrorKind::Timeout)
    }

    fn interrupted(interruption: Interruption, operation: &'static str) -> Self {
        match interruption {
            Interruption::Cancelled => Self::Cancelled { operation },
            Interruption::DeadlineExceeded => Self::Timeout { operation },
        }
    }

    fn is_lock_wait(&self) -> bool {
        match self {
            Self::Db(DbError::Sqlite(err)) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    fn is_sqlite_interrupt(&self) -> bool {
        match self {
            Self::Db(DbError::Sqlite(err)) => {
                err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted)
            }
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidQuery(message) => write!(f, "invalid search query: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Timeout { operation } => write!(f, "{operation} exceeded its deadline"),
            Self::Cancelled { operation } => write!(f, "{operation} was cancelled"),
            Self::Closed => write!(f, "repository closed"),
            Self::InvalidData(message) => write!(f, "invalid persisted book data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => err.source(),
            Self::Db(err) => err.source(),
            Self::InvalidQuery(_)
            | Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::Closed
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<BookValidationError> for RepoError {
    fn from(value: BookValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<r2d2::Error> for RepoError {
    fn from(value: r2d2::Error) -> Self {
        Self::Db(DbError::Pool(value))
    }
}

/// Repository interface for the book metadata store.
pub trait BookRepository {
    /// Inserts the record or overwrites every descriptive field of the
    /// existing `(source, book_id)` row.
    fn upsert(&self, record: &BookRecord, ctx: &CallContext) -> RepoResult<()>;
    /// Returns `Ok(None)` when no row matches the composite key.
    fn get_book(
        &self,
        source: &str,
        book_id: &str,
        ctx: &CallContext,
    ) -> RepoResult<Option<StoredBook>>;
    fn search_books(&self, query: &SearchQuery, ctx: &CallContext) -> RepoResult<Vec<SearchHit>>;
}

impl<R: BookRepository + ?Sized> BookRepository for &R {
    fn upsert(&self, record: &BookRecord, ctx: &CallContext) -> RepoResult<()> {
        (**self).upsert(record, ctx)
    }

    fn get_book(
        &self,
        source: &str,
        book_id: &str,
        ctx: &CallContext,
    ) -> RepoResult<Option<StoredBook>> {
        (**self).get_book(source, book_id, ctx)
    }

    fn search_books(&self, query: &SearchQuery, ctx: &CallContext) -> RepoResult<Vec<SearchHit>> {
        (**self).search_books(query, ctx)
    }
}

impl<R: BookRepository + ?Sized> BookRepository for Arc<R> {
    fn upsert(&self, record: &BookRecord, ctx: &CallContext) -> RepoResult<()> {
        (**self).upsert(record, ctx)
    }

    fn get_book(
        &self,
        source: &str,
        book_id: &str,
        ctx: &CallContext,
    ) -> RepoResult<Option<StoredBook>> {
        (**self).get_book(source, book_id, ctx)
    }

    fn search_books(&self, query: &SearchQuery, ctx: &CallContext) -> RepoResult<Vec<SearchHit>> {
        (**self).search_books(query, ctx)
    }
}

/// SQLite-backed book repository.
///
/// Constructed only through [`SqliteBookRepository::open`] (or `connect`), so
/// the schema is current before any operation is reachable.
pub struct SqliteBookRepository {
    pool: RwLock<Option<ConnectionPool>>,
    schema: SchemaOptions,
}

impl SqliteBookRepository {
    /// Takes ownership of `pool` and brings the schema up to date.
    ///
    /// # Errors
    /// - Schema errors are fatal: no repository is returned.
    pub fn open(pool: ConnectionPool, schema: SchemaOptions) -> RepoResult<Self> {
        let repo = Self {
            pool: RwLock::new(Some(pool)),
            schema,
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    /// Builds the pool described by `config`, then calls [`Self::open`].
    pub fn connect(config: &DbConfig) -> RepoResult<Self> {
        let pool = open_pool(config)?;
        Self::open(pool, SchemaOptions::from_config(config))
    }

    /// Re-runs the schema manager; a no-op report on a current database.
    pub fn ensure_schema(&self) -> RepoResult<SchemaReport> {
        let pool = self.pool()?;
        let mut conn = pool.get()?;
        Ok(migrations::ensure_schema(&mut conn, &self.schema)?)
    }

    /// Releases the pool. Later operations fail with [`RepoError::Closed`].
    ///
    /// Connections still checked out by in-flight calls close when those
    /// calls return them. Calling `close` again is a no-op.
    pub fn close(&self) {
        let taken = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = taken {
            let state = pool.state();
            info!(
                "event=repo_close module=repo status=ok connections={} idle={}",
                state.connections, state.idle_connections
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn pool(&self) -> RepoResult<ConnectionPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RepoError::Closed)
    }

    /// Runs `f` on one pooled connection under the deadline of `ctx`.
    fn with_connection<T>(
        &self,
        operation: &'static str,
        ctx: &CallContext,
        f: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let pool = self.pool()?;
        if let Some(interruption) = ctx.interruption() {
            return Err(RepoError::interrupted(interruption, operation));
        }

        let checkout = match ctx.remaining() {
            Some(remaining) => pool.get_timeout(remaining),
            None => pool.get(),
        };
        let conn = checkout.map_err(|err| match ctx.interruption() {
            Some(interruption) => RepoError::interrupted(interruption, operation),
            None => RepoError::from(err),
        })?;

        let conn: &Connection = &conn;
        let _guard = InterruptGuard::install(conn, ctx)?;
        f(conn).map_err(|err| {
            if err.is_sqlite_interrupt() {
                let interruption = ctx
                    .interruption()
                    .unwrap_or(Interruption::DeadlineExceeded);
                return RepoError::interrupted(interruption, operation);
            }
            match ctx.interruption() {
                Some(interruption) if err.is_lock_wait() => {
                    RepoError::interrupted(interruption, operation)
                }
                _ => err,
            }
        })
    }
}

impl BookRepository for SqliteBookRepository {
    fn upsert(&self, record: &BookRecord, ctx: &CallContext) -> RepoResult<()> {
        record.validate()?;
        let files = serde_json::to_string(&record.files)
            .map_err(|err| RepoError::InvalidData(format!("files are not serializable: {err}")))?;

        let started_at = Instant::now();
        let result = self.with_connection("book_upsert", ctx, |conn| {
            conn.execute(
                UPSERT_SQL.as_str(),
                params![
                    record.source.as_str(),
                    record.book_id.as_str(),
                    record.url.as_str(),
                    record.title.as_deref(),
                    record.author.as_deref(),
                    record.illustrator.as_deref(),
                    record.release_date.as_deref(),
                    record.language.as_deref(),
                    record.category.as_deref(),
                    record.original_publication.as_deref(),
                    record.credits.as_deref(),
                    record.copyright_status.as_deref(),
                    record.downloads.as_deref(),
                    files,
                ],
            )?;
            Ok(())
        });

        log_outcome(
            "book_upsert",
            &format!("source={} book_id={}", record.source, record.book_id),
            started_at,
            &result,
        );
        result
    }

    fn get_book(
        &self,
        source: &str,
        book_id: &str,
        ctx: &CallContext,
    ) -> RepoResult<Option<StoredBook>> {
        let source = SourceId::parse(source)?;
        let book_id = BookId::parse(book_id)?;

        let started_at = Instant::now();
        let result = self.with_connection("book_get", ctx, |conn| {
            let mut stmt = conn.prepare(&format!(
                "{BOOK_SELECT_SQL}
                 WHERE source = ?1
                   AND book_id = ?2;"
            ))?;
            let mut rows = stmt.query(params![source.as_str(), book_id.as_str()])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(parse_book_row(row)?));
            }
            Ok(None)
        });

        log_outcome(
            "book_get",
            &format!(
                "source={} book_id={} found={}",
                source,
                book_id,
                matches!(result, Ok(Some(_)))
            ),
            started_at,
            &result,
        );
        result
    }

    fn search_books(&self, query: &SearchQuery, ctx: &CallContext) -> RepoResult<Vec<SearchHit>> {
        query.validate()?;

        let started_at = Instant::now();
        let result = self.with_connection("book_search", ctx, |conn| {
            substring::search_books(conn, query)
        });

        log_outcome(
            "book_search",
            &format!(
                "limit={} source={} hits={}",
                query.limit,
                query.source.as_deref().unwrap_or("*"),
                result.as_ref().map_or(0, Vec::len)
            ),
            started_at,
            &result,
        );
        result
    }
}

/// Bounds one operation by its context and undoes that on every path.
///
/// The progress handler stops running statements; the busy timeout is capped
/// at the time left, because SQLite never calls the progress handler while
/// it waits for a lock.
struct InterruptGuard<'conn> {
    conn: Option<&'conn Connection>,
    busy_timeout: Duration,
}

impl<'conn> InterruptGuard<'conn> {
    fn install(conn: &'conn Connection, ctx: &CallContext) -> RepoResult<Self> {
        if !ctx.is_bounded() {
            return Ok(Self {
                conn: None,
                busy_timeout: Duration::ZERO,
            });
        }

        let configured_ms: i64 = conn.query_row("PRAGMA busy_timeout;", [], |row| row.get(0))?;
        let busy_timeout = Duration::from_millis(u64::try_from(configured_ms).unwrap_or_default());
        if let Some(remaining) = ctx.remaining() {
            // Rounded up so the deadline has passed once SQLite gives up.
            conn.busy_timeout(busy_timeout.min(remaining + Duration::from_millis(1)))?;
        }
        conn.progress_handler(PROGRESS_CHECK_INTERVAL, Some(ctx.interrupt_probe()));
        Ok(Self {
            conn: Some(conn),
            busy_timeout,
        })
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn {
            conn.progress_handler(0, None::<fn() -> bool>);
            if let Err(err) = conn.busy_timeout(self.busy_timeout) {
                warn!("event=busy_timeout_restore module=repo status=error error={err}");
            }
        }
    }
}

fn log_outcome<T>(event: &str, fields: &str, started_at: Instant, result: &RepoResult<T>) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(_) => debug!("event={event} module=repo status=ok {fields} duration_ms={duration_ms}"),
        Err(err) => warn!(
            "event={event} module=repo status=error {fields} duration_ms={duration_ms} error_kind={:?} error={err}",
            err.kind()
        ),
    }
}

fn parse_book_row(row: &Row<'_>) -> RepoResult<StoredBook> {
    let source_text: String = row.get("source")?;
    let source = SourceId::parse(&source_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid source `{source_text}` in books.source: {err}"))
    })?;

    let book_id_text: String = row.get("book_id")?;
    let book_id = BookId::parse(&book_id_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid book_id `{book_id_text}` in books.book_id: {err}"))
    })?;

    let files = match row.get::<_, Option<String>>("files")? {
        Some(text) => serde_json::from_str::<Option<Vec<FileDescriptor>>>(&text)
            .map_err(|err| {
                RepoError::InvalidData(format!(
                    "invalid files for {source}/{book_id} in books.files: {err}"
                ))
            })?
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let record = BookRecord {
        source,
        book_id,
        url: row.get("url")?,
        title: row.get("title")?,
        author: row.get("author")?,
        illustrator: row.get("illustrator")?,
        release_date: row.get("release_date")?,
        language: row.get("language")?,
        category: row.get("category")?,
        original_publication: row.get("original_publication")?,
        credits: row.get("credits")?,
        copyright_status: row.get("copyright_status")?,
        downloads: row.get("downloads")?,
        files,
    };
    record.validate().map_err(|err| {
        RepoError::InvalidData(format!(
            "row {}/{} failed validation: {err}",
            record.source, record.book_id
        ))
    })?;

    Ok(StoredBook {
        record,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
