//! Repository implementations for database operations.

pub mod migration_summary;
pub mod snippet;
pub mod user;

pub use migration_summary::MigrationSummaryRepository;
pub use snippet::SnippetRepository;
pub use user::UserRepository;
