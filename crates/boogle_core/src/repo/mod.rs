//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the metadata store contract used by services and callers.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `BookRecord::validate()` before persistence.
//! - Not-found is `Ok(None)`, distinct from every error variant.
//! - Errors are classified (`ErrorKind`) and never retried internally.

pub mod book_repo;
pub mod context;
