//! Inputs accepted by the target store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An existing account on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetUser {
    pub id: Uuid,
    pub username: String,
}

/// Account to create.
///
/// `password_hash` holds a PHC hash or nothing. Plaintext never goes here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnippet {
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub private: bool,
    /// URL of the post on the source it came from.
    pub source_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnippetFile {
    pub snippet_id: Uuid,
    pub filename: String,
    pub content: String,
    pub language: String,
    pub size_bytes: i64,
    pub content_sha256: String,
}

impl NewSnippetFile {
    pub fn new(snippet_id: Uuid, filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let content = content.into();
        Self {
            snippet_id,
            language: crate::services::language::detect_language(&filename).to_string(),
            size_bytes: content.len() as i64,
            content_sha256: shared::crypto::sha256_hex(&content),
            filename,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub snippet_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}
