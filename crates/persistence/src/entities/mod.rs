//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod migration_summary;
pub mod snippet;
pub mod user;

pub use migration_summary::MigrationSummaryEntity;
pub use snippet::{SnippetCommentEntity, SnippetEntity, SnippetFileEntity, SnippetStarEntity};
pub use user::UserEntity;
