//! Book use-case service.
//!
//! # Responsibility
//! - Provide stable entry points for API, CLI and seeding callers.
//! - Apply the configured default deadline to every call.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Service layer remains storage-agnostic.

use crate::model::book::{BookRecord, StoredBook};
use crate::repo::book_repo::{BookRepository, RepoResult};
use crate::repo::context::CallContext;
use crate::search::substring::{SearchHit, SearchQuery};
use std::time::Duration;

/// Use-case service wrapper for book metadata operations.
pub struct BookService<R: BookRepository> {
    repo: R,
    operation_timeout: Duration,
}

impl<R: BookRepository> BookService<R> {
    /// Creates a service whose calls each run under `operation_timeout`.
    pub fn new(repo: R, operation_timeout: Duration) -> Self {
        Self {
            repo,
            operation_timeout,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Stores a metadata payload, creating or overwriting its row.
    pub fn upsert(&self, record: &BookRecord) -> RepoResult<()> {
        self.repo.upsert(record, &self.context())
    }

    /// Gets one record by composite identity.
    pub fn get_book(&self, source: &str, book_id: &str) -> RepoResult<Option<StoredBook>> {
        self.repo.get_book(source, book_id, &self.context())
    }

    /// Searches title/author substrings, optionally within one source.
    ///
    /// # Contract
    /// - `limit` must be at least 1.
    /// - Results are ordered by title ascending.
    pub fn search_books(
        &self,
        text: &str,
        limit: u32,
        source: Option<&str>,
    ) -> RepoResult<Vec<SearchHit>> {
        let mut query = SearchQuery::new(text).with_limit(limit);
        if let Some(source) = source {
            query = query.with_source(source);
        }
        self.repo.search_books(&query, &self.context())
    }

    fn context(&self) -> CallContext {
        CallContext::with_timeout(self.operation_timeout)
    }
}
