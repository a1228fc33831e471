//! Snippet, file, comment and star entities.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the snippets table.
#[derive(Debug, Clone, FromRow)]
pub struct SnippetEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub private: bool,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row mapping for the snippet_files table.
#[derive(Debug, Clone, FromRow)]
pub struct SnippetFileEntity {
    pub id: Uuid,
    pub snippet_id: Uuid,
    pub filename: String,
    pub content: String,
    pub language: String,
    pub size_bytes: i64,
    pub content_sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SnippetCommentEntity {
    pub id: Uuid,
    pub snippet_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SnippetStarEntity {
    pub user_id: Uuid,
    pub snippet_id: Uuid,
    pub created_at: DateTime<Utc>,
}
