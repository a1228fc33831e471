//! Domain models for the migration engine.

pub mod migration_job;
pub mod migration_result;
pub mod settings;
pub mod source;
pub mod target;

pub use migration_job::{JobKind, JobStatus, MigrationJob, SourceDescriptor};
pub use migration_result::{
    DryRunSummary, EntityKind, MigrationCounts, MigrationErrorRecord, MigrationResult,
    MigrationSummary,
};
pub use settings::{MigrationSettings, SourceKind};
pub use source::{
    Quota, SourceComment, SourceFile, SourceId, SourceKey, SourcePost, SourceSocialEdge,
    SourceUser,
};
pub use target::{NewComment, NewSnippet, NewSnippetFile, NewUser, TargetUser};
