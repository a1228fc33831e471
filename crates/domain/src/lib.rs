//! Domain layer for the snippet migrator.
//!
//! This crate contains:
//! - Domain models (jobs, settings, source projections, results)
//! - The migration error taxonomy
//! - Migration services (entity mapping, content rewriting, language detection)
//! - The seams between the engine and the outside world (sources, target store, progress)

pub mod error;
pub mod models;
pub mod services;

pub use error::{ErrorKind, MigrationError};
