//! Book metadata domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by repository and service code.
//! - Keep identity validation at the type level rather than at call sites.
//!
//! # Invariants
//! - Every persisted record is identified by `(SourceId, BookId)`.
//! - No delete lifecycle exists; records are only created or overwritten.

pub mod book;
