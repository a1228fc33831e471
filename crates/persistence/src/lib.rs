//! Persistence layer for the snippet migrator.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - `TargetStore` adapters (PostgreSQL and in-memory)

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
pub mod store;

pub use store::{InMemoryTargetStore, PgTargetStore};
