//! JSON-lines catalog files used as seeding input.
//!
//! # Responsibility
//! - Parse one `BookRecord` payload per line and group them by source.
//! - Expose each group as a `MetadataSource` for `SeedService`.
//!
//! # Invariants
//! - Blank lines are skipped; every other line either yields a record or a
//!   rejection carrying its 1-based line number.
//! - Ids keep first-appearance order; a repeated id keeps the last payload.

use boogle_core::{BookRecord, FetchError, MetadataSource, SeedFailure};
use serde_json::Value;
use std::collections::BTreeMap;

/// One origin catalog loaded from a JSON-lines file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSource {
    name: String,
    order: Vec<String>,
    records: BTreeMap<String, BookRecord>,
}

impl CatalogSource {
    fn new(name: String) -> Self {
        Self {
            name,
            order: Vec::new(),
            records: BTreeMap::new(),
        }
    }

    fn insert(&mut self, record: BookRecord) {
        let book_id = record.book_id.as_str().to_string();
        if !self.records.contains_key(&book_id) {
            self.order.push(book_id.clone());
        }
        self.records.insert(book_id, record);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

impl MetadataSource for CatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn book_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    fn fetch(&self, book_id: &str) -> Result<BookRecord, FetchError> {
        self.records
            .get(book_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                book_id: book_id.to_string(),
            })
    }
}

/// A line that could not be decoded into a `BookRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRejection {
    pub line: usize,
    /// Best-effort identity read from the raw JSON, when present.
    pub source: Option<String>,
    pub book_id: Option<String>,
    pub reason: String,
}

impl CatalogRejection {
    pub fn matches_source(&self, wanted: Option<&str>) -> bool {
        match (wanted, self.source.as_deref()) {
            (Some(wanted), Some(source)) => source.trim().eq_ignore_ascii_case(wanted.trim()),
            _ => true,
        }
    }

    pub fn into_failure(self) -> SeedFailure {
        SeedFailure {
            source: self.source.unwrap_or_else(|| "unknown".to_string()),
            book_id: self
                .book_id
                .unwrap_or_else(|| format!("line {}", self.line)),
            reason: self.reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    /// Sources in order of first appearance.
    pub sources: Vec<CatalogSource>,
    pub rejected: Vec<CatalogRejection>,
}

/// Parses JSON-lines text into per-source catalogs.
pub fn parse_catalog(text: &str) -> Catalog {
    let mut catalog = Catalog::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<BookRecord>(line) {
            Ok(record) => {
                let position = catalog
                    .sources
                    .iter()
                    .position(|source| source.name == record.source.as_str());
                let source = match position {
                    Some(position) => &mut catalog.sources[position],
                    None => {
                        catalog
                            .sources
                            .push(CatalogSource::new(record.source.as_str().to_string()));
                        let last = catalog.sources.len() - 1;
                        &mut catalog.sources[last]
                    }
                };
                source.insert(record);
            }
            Err(err) => catalog.rejected.push(reject(index + 1, line, &err)),
        }
    }

    catalog
}

fn reject(line_number: usize, line: &str, err: &serde_json::Error) -> CatalogRejection {
    let raw = serde_json::from_str::<Value>(line).ok();
    let field = |name: &str| {
        raw.as_ref()
            .and_then(|value| value.get(name))
            .and_then(|value| match value {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
    };

    CatalogRejection {
        line: line_number,
        source: field("source").map(|source| source.to_lowercase()),
        book_id: field("book_id"),
        reason: format!("line {line_number}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_catalog;
    use boogle_core::{FetchError, MetadataSource};

    const CATALOG: &str = r#"
{"source":"gutenberg","book_id":84,"url":"https://www.gutenberg.org/ebooks/84","title":"Frankenstein"}
{"source":"StandardEbooks","book_id":"mary-shelley/frankenstein","url":"https://standardebooks.org/ebooks/mary-shelley/frankenstein"}

{"source":"gutenberg","book_id":"2701","url":"https://www.gutenberg.org/ebooks/2701","files":null}
{"source":"gutenberg","book_id":"84","url":"https://www.gutenberg.org/ebooks/84","title":"Frankenstein (revised)"}
{"source":"gutenberg","book_id":"11"}
not json at all
"#;

    #[test]
    fn lines_are_grouped_by_source_in_first_appearance_order() {
        let catalog = parse_catalog(CATALOG);

        let names = catalog
            .sources
            .iter()
            .map(|source| source.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["gutenberg", "standardebooks"]);
        assert_eq!(catalog.sources[0].book_ids(), vec!["84", "2701"]);
        assert_eq!(catalog.sources[1].len(), 1);
    }

    #[test]
    fn repeated_id_keeps_last_payload() {
        let catalog = parse_catalog(CATALOG);

        let record = catalog.sources[0].fetch("84").unwrap();
        assert_eq!(record.title.as_deref(), Some("Frankenstein (revised)"));
    }

    #[test]
    fn undecodable_lines_are_rejected_with_line_numbers() {
        let catalog = parse_catalog(CATALOG);

        assert_eq!(catalog.rejected.len(), 2);
        let missing_url = &catalog.rejected[0];
        assert_eq!(missing_url.line, 7);
        assert_eq!(missing_url.source.as_deref(), Some("gutenberg"));
        assert_eq!(missing_url.book_id.as_deref(), Some("11"));
        assert!(missing_url.reason.contains("url"));

        let garbage = catalog.rejected[1].clone();
        assert!(garbage.source.is_none());
        assert!(garbage.matches_source(Some("gutenberg")));
        let failure = garbage.into_failure();
        assert_eq!(failure.source, "unknown");
        assert_eq!(failure.book_id, "line 8");
    }

    #[test]
    fn rejection_source_filter_is_case_insensitive() {
        let catalog = parse_catalog(CATALOG);

        assert!(catalog.rejected[0].matches_source(Some("Gutenberg")));
        assert!(!catalog.rejected[0].matches_source(Some("standardebooks")));
        assert!(catalog.rejected[0].matches_source(None));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let catalog = parse_catalog(CATALOG);

        let err = catalog.sources[0].fetch("999999").unwrap_err();
        assert_eq!(
            err,
            FetchError::NotFound {
                book_id: "999999".to_string()
            }
        );
    }

    #[test]
    fn empty_input_yields_empty_catalog() {
        let catalog = parse_catalog("\n   \n");

        assert!(catalog.sources.is_empty());
        assert!(catalog.rejected.is_empty());
    }
}
