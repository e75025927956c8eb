use boogle_core::db::open_pool_in_memory;
use boogle_core::{
    BookId, BookRecord, BookRepository, BookValidationError, CallContext, DbConfig, ErrorKind,
    FileDescriptor, RepoError, SchemaOptions, SourceId, SqliteBookRepository,
};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn memory_repo() -> SqliteBookRepository {
    SqliteBookRepository::open(open_pool_in_memory().unwrap(), SchemaOptions::default()).unwrap()
}

fn file_repo() -> (TempDir, PathBuf, SqliteBookRepository) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boogle.sqlite3");
    let repo = SqliteBookRepository::connect(&DbConfig::for_file(&path)).unwrap();
    (dir, path, repo)
}

fn frankenstein() -> BookRecord {
    let mut record = BookRecord::new(
        SourceId::parse("gutenberg").unwrap(),
        BookId::parse("84").unwrap(),
        "https://www.gutenberg.org/ebooks/84",
    );
    record.title = Some("Frankenstein; Or, The Modern Prometheus".to_string());
    record.author = Some("Shelley, Mary Wollstonecraft".to_string());
    record.language = Some("English".to_string());
    record.downloads = Some("104452".to_string());
    record.files = vec![
        FileDescriptor::new("EPUB3", "https://www.gutenberg.org/ebooks/84.epub3.images"),
        FileDescriptor::new("Plain Text UTF-8", "https://www.gutenberg.org/ebooks/84.txt.utf-8"),
    ];
    record
}

fn ctx() -> CallContext {
    CallContext::background()
}

fn row_count(path: &PathBuf) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM books;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn upsert_and_get_roundtrip() {
    let repo = memory_repo();
    let record = frankenstein();

    repo.upsert(&record, &ctx()).unwrap();

    let stored = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    assert_eq!(stored.record, record);
    assert!(stored.created_at > 0);
    assert_eq!(stored.created_at, stored.updated_at);
}

#[test]
fn repeated_upsert_keeps_one_row_and_advances_updated_at() {
    let (_dir, path, repo) = file_repo();
    let record = frankenstein();

    repo.upsert(&record, &ctx()).unwrap();
    let first = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    repo.upsert(&record, &ctx()).unwrap();
    let second = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();

    assert_eq!(row_count(&path), 1);
    assert_eq!(second.record, first.record);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

#[test]
fn upsert_overwrites_every_descriptive_field() {
    let repo = memory_repo();
    repo.upsert(&frankenstein(), &ctx()).unwrap();

    let mut replacement = BookRecord::new(
        SourceId::parse("gutenberg").unwrap(),
        BookId::parse("84").unwrap(),
        "https://www.gutenberg.org/ebooks/84/",
    );
    replacement.title = Some("Frankenstein".to_string());
    replacement.files = vec![FileDescriptor::new("HTML", "https://www.gutenberg.org/84.html")];
    repo.upsert(&replacement, &ctx()).unwrap();

    let stored = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    assert_eq!(stored.record, replacement);
    assert!(stored.record.author.is_none(), "absent fields must be cleared");
    assert!(stored.record.language.is_none());
}

#[test]
fn same_book_id_under_different_sources_coexists() {
    let (_dir, path, repo) = file_repo();
    let gutenberg = frankenstein();
    let mut standard = frankenstein();
    standard.source = SourceId::parse("standardebooks").unwrap();
    standard.url = "https://standardebooks.org/ebooks/mary-shelley/frankenstein".to_string();

    repo.upsert(&gutenberg, &ctx()).unwrap();
    repo.upsert(&standard, &ctx()).unwrap();

    assert_eq!(row_count(&path), 2);
    let loaded = repo
        .get_book("standardebooks", "84", &ctx())
        .unwrap()
        .unwrap();
    assert_eq!(loaded.record.url, standard.url);
    let loaded = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    assert_eq!(loaded.record.url, gutenberg.url);
}

#[test]
fn missing_files_are_stored_as_empty_list() {
    let (_dir, path, repo) = file_repo();
    let record = BookRecord::new(
        SourceId::parse("gutenberg").unwrap(),
        BookId::parse("1342").unwrap(),
        "https://www.gutenberg.org/ebooks/1342",
    );

    repo.upsert(&record, &ctx()).unwrap();

    let conn = Connection::open(&path).unwrap();
    let raw: String = conn
        .query_row("SELECT files FROM books WHERE book_id = '1342';", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(raw, "[]");
    let stored = repo.get_book("gutenberg", "1342", &ctx()).unwrap().unwrap();
    assert!(stored.record.files.is_empty());
}

#[test]
fn get_missing_book_returns_none() {
    let repo = memory_repo();
    repo.upsert(&frankenstein(), &ctx()).unwrap();

    assert!(repo.get_book("gutenberg", "85", &ctx()).unwrap().is_none());
    assert!(repo.get_book("feedbooks", "84", &ctx()).unwrap().is_none());
}

#[test]
fn get_normalizes_source_case_and_whitespace() {
    let repo = memory_repo();
    repo.upsert(&frankenstein(), &ctx()).unwrap();

    let stored = repo
        .get_book(" Gutenberg ", " 84 ", &ctx())
        .unwrap()
        .unwrap();
    assert_eq!(stored.record.source.as_str(), "gutenberg");
    assert_eq!(stored.record.book_id.as_str(), "84");
}

#[test]
fn invalid_record_is_rejected_without_writing() {
    let (_dir, path, repo) = file_repo();
    let mut record = frankenstein();
    record.url = "   ".to_string();

    let err = repo.upsert(&record, &ctx()).unwrap_err();

    assert!(matches!(
        err,
        RepoError::Validation(BookValidationError::EmptyUrl)
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!err.is_retryable());
    assert_eq!(row_count(&path), 0);
}

#[test]
fn file_entry_without_url_is_rejected() {
    let repo = memory_repo();
    let mut record = frankenstein();
    record.files.push(FileDescriptor::new("MOBI", ""));

    let err = repo.upsert(&record, &ctx()).unwrap_err();

    assert!(matches!(
        err,
        RepoError::Validation(BookValidationError::InvalidFile { index: 2, .. })
    ));
}

#[test]
fn malformed_identity_on_lookup_is_validation_error() {
    let repo = memory_repo();

    let err = repo.get_book("not a source", "84", &ctx()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = repo.get_book("gutenberg", "  ", &ctx()).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(BookValidationError::EmptyBookId)
    ));
}

#[test]
fn numeric_book_id_payload_is_stored_as_text() {
    let repo = memory_repo();
    let record: BookRecord = serde_json::from_str(
        r#"{
            "source": "Gutenberg",
            "book_id": 2701,
            "url": "https://www.gutenberg.org/ebooks/2701",
            "title": "Moby Dick; Or, The Whale",
            "author": "Melville, Herman",
            "files": null
        }"#,
    )
    .unwrap();

    repo.upsert(&record, &ctx()).unwrap();

    let stored = repo.get_book("gutenberg", "2701", &ctx()).unwrap().unwrap();
    assert_eq!(stored.record.book_id.as_str(), "2701");
    assert!(stored.record.files.is_empty());
    assert_eq!(stored.record.title.as_deref(), Some("Moby Dick; Or, The Whale"));
}

#[test]
fn stored_json_null_files_read_as_empty_list() {
    let (_dir, path, repo) = file_repo();
    repo.upsert(&frankenstein(), &ctx()).unwrap();
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE books SET files = 'null';", []).unwrap();
    }

    let stored = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    assert!(stored.record.files.is_empty());
}

#[test]
fn stored_files_with_wrong_shape_are_invalid_data() {
    let (_dir, path, repo) = file_repo();
    repo.upsert(&frankenstein(), &ctx()).unwrap();
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE books SET files = '{\"format\":\"EPUB3\"}';", [])
            .unwrap();
    }

    let err = repo.get_book("gutenberg", "84", &ctx()).unwrap_err();

    assert!(matches!(err, RepoError::InvalidData(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn concurrent_upserts_of_one_identity_leave_one_row() {
    let (_dir, path, repo) = file_repo();
    let repo = Arc::new(repo);

    let workers = (0..8)
        .map(|worker| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                let mut record = frankenstein();
                record.downloads = Some(worker.to_string());
                repo.upsert(&record, &CallContext::background()).unwrap();
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(row_count(&path), 1);
    let stored = repo.get_book("gutenberg", "84", &ctx()).unwrap().unwrap();
    let downloads = stored.record.downloads.unwrap();
    assert!((0..8).any(|worker| downloads == worker.to_string()));
    assert!(stored.updated_at >= stored.created_at);
}
