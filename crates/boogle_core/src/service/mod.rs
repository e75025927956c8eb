//! Service layer for use-case orchestration.
//!
//! # Responsibility
//! - Apply default deadlines and request shaping on top of repositories.
//! - Drive bulk ingestion from external metadata sources.

pub mod book_service;
pub mod seed_service;
