//! Core metadata repository for Boogle.
//! This crate is the single source of truth for book identity, schema
//! evolution and persistence invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use config::{ConfigError, DbConfig, DbTarget};
pub use db::migrations::{ensure_schema, SchemaOptions, SchemaReport};
pub use db::{open_pool, open_pool_in_memory, ConnectionPool, DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, init_logging_with, init_stderr_logging, logging_status,
    LogSink,
};
pub use model::book::{
    BookId, BookRecord, BookValidationError, FileDescriptor, SourceId, StoredBook,
};
pub use repo::book_repo::{BookRepository, ErrorKind, RepoError, RepoResult, SqliteBookRepository};
pub use repo::context::{CallContext, CancelToken};
pub use search::substring::{search_books, SearchHit, SearchQuery};
pub use service::book_service::BookService;
pub use service::seed_service::{
    FetchError, MetadataSource, SeedFailure, SeedFilter, SeedReport, SeedService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
