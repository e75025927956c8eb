//! Case-insensitive substring search over book titles and authors.
//!
//! # Responsibility
//! - Match query text anywhere in `title` or `author`.
//! - Return lightweight hits keyed by the public `(source, book_id)` identity.
//!
//! # Invariants
//! - Query text is matched literally; `%`, `_` and `\` are escaped.
//! - Both sides are folded with `str::to_lowercase`: the pattern here, the
//!   columns through `unicode_lower` (see `db::register_functions`).
//! - Empty text matches every row.
//! - Ordering is deterministic: title case-insensitively (NULL as empty), then
//!   identity.

use crate::db::UNICODE_LOWER_FN;
use crate::model::book::SourceId;
use crate::repo::book_repo::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use serde::Serialize;

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const LIKE_ESCAPE: char = '\\';

/// Search options for substring queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Text matched against title and author, case-insensitively.
    pub text: String,
    /// Maximum number of hits; must be at least 1.
    pub limit: u32,
    /// Optional exact source filter.
    pub source: Option<String>,
}

impl SearchQuery {
    /// Creates a query with the default limit and no source filter.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            source: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Rejects queries that cannot run, before any I/O.
    pub fn validate(&self) -> RepoResult<()> {
        self.normalized_source().map(|_| ())
    }

    fn normalized_source(&self) -> RepoResult<Option<SourceId>> {
        if self.limit < 1 {
            return Err(RepoError::InvalidQuery(format!(
                "limit must be >= 1, got {}",
                self.limit
            )));
        }
        self.source
            .as_deref()
            .map(SourceId::parse)
            .transpose()
            .map_err(RepoError::from)
    }
}

/// Single search hit returned by [`search_books`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub source: String,
    pub book_id: String,
    pub title: Option<String>,
    pub url: String,
}

/// Searches `books` by title or author substring.
///
/// `conn` must carry the functions from [`crate::db::register_functions`];
/// pooled connections always do.
pub fn search_books(conn: &Connection, query: &SearchQuery) -> RepoResult<Vec<SearchHit>> {
    let source = query.normalized_source()?;
    let pattern = like_pattern(&query.text);

    let mut sql = format!(
        "SELECT source, book_id, title, url
         FROM books
         WHERE ({UNICODE_LOWER_FN}(coalesce(title, '')) LIKE ?1 ESCAPE '\\'
                OR {UNICODE_LOWER_FN}(coalesce(author, '')) LIKE ?1 ESCAPE '\\')"
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(pattern)];

    if let Some(source) = source {
        sql.push_str(" AND source = ?2");
        bind_values.push(Value::Text(source.as_str().to_string()));
    }

    sql.push_str(
        " ORDER BY coalesce(title, '') COLLATE NOCASE ASC, coalesce(title, '') ASC,
                   source ASC, book_id ASC
          LIMIT ?",
    );
    bind_values.push(Value::Integer(i64::from(query.limit)));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut hits = Vec::new();
    while let Some(row) = rows.next()? {
        hits.push(parse_search_hit(row)?);
    }

    Ok(hits)
}

fn parse_search_hit(row: &Row<'_>) -> RepoResult<SearchHit> {
    Ok(SearchHit {
        source: row.get("source")?,
        book_id: row.get("book_id")?,
        title: row.get("title")?,
        url: row.get("url")?,
    })
}

fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
