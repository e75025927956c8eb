//! Search entry points.
//!
//! # Responsibility
//! - Expose case-insensitive substring search over title and author.
//! - Keep search result shaping inside core.
//!
//! # See also
//! - crate::repo::book_repo

pub mod substring;
