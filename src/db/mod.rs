//! Database layer for appstats
//!
//! This module provides the durable store using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries and transactional mutations

pub mod repo;
pub mod schema;

pub use repo::Database;
