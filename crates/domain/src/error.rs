//! Migration error taxonomy.
//!
//! Fatal errors abort a job; everything else is recorded against the item
//! that caused it and the stage moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;

/// Errors raised while running or controlling a migration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    /// Source unreachable or credentials rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Source does not have the expected shape.
    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    /// A single source item could not be fetched.
    #[error("Failed to fetch {kind} {source_id}: {message}")]
    ItemFetch {
        kind: EntityKind,
        source_id: String,
        message: String,
    },

    /// The target store rejected a single create.
    #[error("Failed to persist {kind} {source_id}: {message}")]
    ItemPersist {
        kind: EntityKind,
        source_id: String,
        message: String,
    },

    /// An item references an entity that was never mapped.
    #[error("{kind} {source_id} references unmapped {dependency} {dependency_id}")]
    MissingDependency {
        kind: EntityKind,
        source_id: String,
        dependency: EntityKind,
        dependency_id: String,
    },

    /// The source refused a request until its quota window resets.
    #[error("Rate limit exceeded until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Migration cancelled")]
    Cancelled,
}

/// Serialisable tag attached to every recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    SchemaValidation,
    ItemFetch,
    ItemPersist,
    MissingDependency,
    RateLimited,
    JobNotFound,
    InvalidSettings,
    Cancelled,
}

impl MigrationError {
    pub fn item_fetch(kind: EntityKind, source_id: impl ToString, message: impl ToString) -> Self {
        Self::ItemFetch {
            kind,
            source_id: source_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn item_persist(
        kind: EntityKind,
        source_id: impl ToString,
        message: impl ToString,
    ) -> Self {
        Self::ItemPersist {
            kind,
            source_id: source_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn missing_dependency(
        kind: EntityKind,
        source_id: impl ToString,
        dependency: EntityKind,
        dependency_id: impl ToString,
    ) -> Self {
        Self::MissingDependency {
            kind,
            source_id: source_id.to_string(),
            dependency,
            dependency_id: dependency_id.to_string(),
        }
    }

    /// Fatal errors abort the whole job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::SchemaValidation(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::SchemaValidation(_) => ErrorKind::SchemaValidation,
            Self::ItemFetch { .. } => ErrorKind::ItemFetch,
            Self::ItemPersist { .. } => ErrorKind::ItemPersist,
            Self::MissingDependency { .. } => ErrorKind::MissingDependency,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::JobNotFound(_) => ErrorKind::JobNotFound,
            Self::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Attaches an item to an error that has none, so an exhausted rate-limit
    /// retry is recorded against the item it was fetching.
    pub fn for_item(self, kind: EntityKind, source_id: impl ToString) -> Self {
        match self {
            Self::RateLimited { .. } => Self::item_fetch(kind, source_id, self),
            other => other,
        }
    }

    /// The entity kind and source ID an item-level error refers to.
    pub fn subject(&self) -> Option<(EntityKind, &str)> {
        match self {
            Self::ItemFetch {
                kind, source_id, ..
            }
            | Self::ItemPersist {
                kind, source_id, ..
            }
            | Self::MissingDependency {
                kind, source_id, ..
            } => Some((*kind, source_id.as_str())),
            _ => None,
        }
    }
}
