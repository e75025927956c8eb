//! Bulk ingestion from external metadata sources.
//!
//! # Responsibility
//! - Walk every registered source's id list, fetch each payload and upsert it.
//! - Report per-item outcomes without aborting the run.
//!
//! # Invariants
//! - A failing item never stops the remaining items.
//! - No retries happen here; failures are reported for the caller to act on.
//! - A fetched payload must carry the identity it was requested under.

use crate::model::book::BookRecord;
use crate::repo::book_repo::BookRepository;
use crate::service::book_service::BookService;
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Failure reported by a metadata source for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    NotFound { book_id: String },
    Unavailable(String),
    InvalidPayload(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { book_id } => write!(f, "book `{book_id}` not found at source"),
            Self::Unavailable(message) => write!(f, "source unavailable: {message}"),
            Self::InvalidPayload(message) => write!(f, "invalid metadata payload: {message}"),
        }
    }
}

impl Error for FetchError {}

/// Extraction boundary for one origin catalog.
pub trait MetadataSource {
    /// Source id the fetched records belong to, e.g. `gutenberg`.
    fn name(&self) -> &str;
    /// Ids to ingest, in the order they should be attempted.
    fn book_ids(&self) -> Vec<String>;
    fn fetch(&self, book_id: &str) -> Result<BookRecord, FetchError>;
}

/// Narrows a seeding run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedFilter {
    /// Only seed this source (case-insensitive).
    pub source: Option<String>,
    /// Cap on the total number of items attempted across all sources.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedFailure {
    pub source: String,
    pub book_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub attempted: usize,
    pub stored: usize,
    pub failures: Vec<SeedFailure>,
}

/// Seeding driver over a set of metadata sources.
pub struct SeedService<'a, R: BookRepository> {
    books: &'a BookService<R>,
    sources: Vec<Box<dyn MetadataSource + 'a>>,
}

impl<'a, R: BookRepository> SeedService<'a, R> {
    pub fn new(books: &'a BookService<R>) -> Self {
        Self {
            books,
            sources: Vec::new(),
        }
    }

    pub fn register(&mut self, source: impl MetadataSource + 'a) {
        self.sources.push(Box::new(source));
    }

    pub fn with_source(mut self, source: impl MetadataSource + 'a) -> Self {
        self.register(source);
        self
    }

    /// Runs one seeding pass.
    ///
    /// # Contract
    /// - Sources are visited in registration order, ids in source order.
    /// - Fetch and upsert failures are recorded and the run continues.
    pub fn seed(&self, filter: &SeedFilter) -> SeedReport {
        let started_at = Instant::now();
        let wanted = filter
            .source
            .as_deref()
            .map(|source| source.trim().to_lowercase());
        let mut report = SeedReport::default();

        let selected = self
            .sources
            .iter()
            .filter(|source| {
                wanted
                    .as_deref()
                    .map_or(true, |wanted| source.name().eq_ignore_ascii_case(wanted))
            })
            .collect::<Vec<_>>();

        if selected.is_empty() {
            warn!(
                "event=seed_run module=seed status=error error_code=unknown_source source={}",
                wanted.as_deref().unwrap_or("*")
            );
            return report;
        }

        'sources: for source in selected {
            for book_id in source.book_ids() {
                if filter.limit.is_some_and(|limit| report.attempted >= limit) {
                    break 'sources;
                }
                report.attempted += 1;

                match self.seed_one(&**source, &book_id) {
                    Ok(()) => {
                        report.stored += 1;
                        info!(
                            "event=seed_item module=seed status=ok source={} book_id={}",
                            source.name(),
                            book_id
                        );
                    }
                    Err(reason) => {
                        warn!(
                            "event=seed_item module=seed status=error source={} book_id={} error={}",
                            source.name(),
                            book_id,
                            reason
                        );
                        report.failures.push(SeedFailure {
                            source: source.name().to_string(),
                            book_id,
                            reason,
                        });
                    }
                }
            }
        }

        info!(
            "event=seed_run module=seed status=ok attempted={} stored={} failed={} duration_ms={}",
            report.attempted,
            report.stored,
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
        report
    }

    fn seed_one(&self, source: &dyn MetadataSource, book_id: &str) -> Result<(), String> {
        let record = source.fetch(book_id).map_err(|err| err.to_string())?;

        if !record.source.as_str().eq_ignore_ascii_case(source.name())
            || record.book_id.as_str() != book_id.trim()
        {
            return Err(format!(
                "payload identity {}/{} does not match requested {}/{}",
                record.source,
                record.book_id,
                source.name(),
                book_id
            ));
        }

        self.books.upsert(&record).map_err(|err| err.to_string())
    }
}
