//! Write surface of the destination store.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    MigrationSummary, NewComment, NewSnippet, NewSnippetFile, NewUser, TargetUser,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Per-item create calls against the target. No call spans more than one
/// row, so a run that stops halfway leaves what it created in place.
#[async_trait::async_trait]
pub trait TargetStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_user_by_username(&self, username: &str)
        -> Result<Option<TargetUser>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<Uuid, StoreError>;

    async fn create_snippet(&self, snippet: NewSnippet) -> Result<Uuid, StoreError>;

    async fn create_file(&self, file: NewSnippetFile) -> Result<Uuid, StoreError>;

    async fn create_comment(&self, comment: NewComment) -> Result<Uuid, StoreError>;

    /// Returns false when the star already existed.
    async fn create_star(&self, user_id: Uuid, snippet_id: Uuid) -> Result<bool, StoreError>;

    async fn save_summary(&self, summary: &MigrationSummary) -> Result<(), StoreError>;

    /// Newest first; `page` is 1-based.
    async fn list_summaries(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MigrationSummary>, StoreError>;
}
