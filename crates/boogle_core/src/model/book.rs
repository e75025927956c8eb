//! Book metadata domain model.
//!
//! # Responsibility
//! - Define the canonical payload accepted for persistence (`BookRecord`).
//! - Define the read shape returned by the store (`StoredBook`).
//! - Normalize identity and file descriptors at the payload boundary.
//!
//! # Invariants
//! - `(source, book_id)` is the only public identity of a record.
//! - `SourceId` and `BookId` can only be built through validating parsers.
//! - `files` is never absent; `null` and missing both decode to `[]`.
//! - Timestamps are owned by the store and never accepted from callers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static SOURCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("source pattern must compile")
});

/// Validation error raised before any record reaches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookValidationError {
    EmptySource,
    InvalidSource(String),
    EmptyBookId,
    EmptyUrl,
    InvalidFile { index: usize, reason: &'static str },
}

impl Display for BookValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySource => write!(f, "source must not be empty"),
            Self::InvalidSource(value) => write!(
                f,
                "invalid source `{value}`; expected lowercase letters, digits, `_`, `-` or `.`"
            ),
            Self::EmptyBookId => write!(f, "book_id must not be empty"),
            Self::EmptyUrl => write!(f, "url must not be empty"),
            Self::InvalidFile { index, reason } => write!(f, "files[{index}]: {reason}"),
        }
    }
}

impl Error for BookValidationError {}

/// Origin catalog identifier, e.g. `gutenberg`.
///
/// Stored lowercased so `Gutenberg` and `gutenberg` name the same catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(raw: &str) -> Result<Self, BookValidationError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(BookValidationError::EmptySource);
        }
        if !SOURCE_PATTERN.is_match(&normalized) {
            return Err(BookValidationError::InvalidSource(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SourceId {
    type Error = BookValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin-assigned book identifier, kept as text to stay origin-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    pub fn parse(raw: &str) -> Result<Self, BookValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BookValidationError::EmptyBookId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BookId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extraction payloads for numeric catalogs send the id as a JSON number.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBookId {
    Text(String),
    Integer(i64),
}

impl<'de> Deserialize<'de> for BookId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match RawBookId::deserialize(deserializer)? {
            RawBookId::Text(value) => value,
            RawBookId::Integer(value) => value.to_string(),
        };
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Normalized downloadable file entry (format label + URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFileDescriptor")]
pub struct FileDescriptor {
    pub format: String,
    pub url: String,
}

impl FileDescriptor {
    pub fn new(format: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            format: format.into().trim().to_string(),
            url: url.into().trim().to_string(),
        }
    }
}

/// Accepted spellings of a file entry across catalogs.
#[derive(Deserialize)]
struct RawFileDescriptor {
    #[serde(default, alias = "type", alias = "kind", alias = "label")]
    format: String,
    #[serde(default, alias = "href", alias = "link")]
    url: String,
}

impl From<RawFileDescriptor> for FileDescriptor {
    fn from(value: RawFileDescriptor) -> Self {
        Self::new(value.format, value.url)
    }
}

/// Caller-supplied metadata record, keyed by `(source, book_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub source: SourceId,
    pub book_id: BookId,
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub illustrator: Option<String>,
    pub release_date: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub original_publication: Option<String>,
    pub credits: Option<String>,
    pub copyright_status: Option<String>,
    pub downloads: Option<String>,
    #[serde(default, deserialize_with = "deserialize_files")]
    pub files: Vec<FileDescriptor>,
}

impl BookRecord {
    /// Creates a record with only identity and URL set.
    pub fn new(source: SourceId, book_id: BookId, url: impl Into<String>) -> Self {
        Self {
            source,
            book_id,
            url: url.into(),
            title: None,
            author: None,
            illustrator: None,
            release_date: None,
            language: None,
            category: None,
            original_publication: None,
            credits: None,
            copyright_status: None,
            downloads: None,
            files: Vec::new(),
        }
    }

    /// Validates the non-identity fields that storage requires.
    ///
    /// Identity is already guaranteed by `SourceId`/`BookId` construction.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        if self.url.trim().is_empty() {
            return Err(BookValidationError::EmptyUrl);
        }

        for (index, file) in self.files.iter().enumerate() {
            if file.format.trim().is_empty() {
                return Err(BookValidationError::InvalidFile {
                    index,
                    reason: "format must not be empty",
                });
            }
            if file.url.trim().is_empty() {
                return Err(BookValidationError::InvalidFile {
                    index,
                    reason: "url must not be empty",
                });
            }
        }

        Ok(())
    }
}

fn deserialize_files<'de, D>(deserializer: D) -> Result<Vec<FileDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<FileDescriptor>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Persisted record as returned by reads, with store-owned timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredBook {
    #[serde(flatten)]
    pub record: BookRecord,
    /// Unix epoch milliseconds of the first write.
    pub created_at: i64,
    /// Unix epoch milliseconds of the latest write; never below `created_at`.
    pub updated_at: i64,
}
