//! Read-only projections of source-system records.
//!
//! Connectors translate foreign rows and API payloads into these types; the
//! orchestrator only ever reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier native to a source system.
///
/// Legacy rows and GitHub/GitLab users are keyed by integers, gists by
/// opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
    Int(i64),
    Str(String),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Int(id) => write!(f, "{}", id),
            SourceId::Str(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for SourceId {
    fn from(id: i64) -> Self {
        SourceId::Int(id)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId::Str(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        SourceId::Str(id)
    }
}

/// A user account on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: SourceId,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Stored password hash; only the legacy source exposes one.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SourceUser {
    pub fn new(id: impl Into<SourceId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            display_name: None,
            password_hash: None,
            created_at: None,
        }
    }
}

/// A single file attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub filename: String,
    /// Inline content. Remote list endpoints omit it; detail fetches fill it.
    pub content: Option<String>,
    pub raw_url: Option<String>,
    pub size: Option<i64>,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            filename: filename.into(),
            size: Some(content.len() as i64),
            content: Some(content),
            raw_url: None,
        }
    }
}

/// A gist or snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePost {
    pub id: SourceId,
    pub owner_id: SourceId,
    /// Public URL of the post on the source, used for rewriting links to it.
    pub html_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub private: bool,
    pub files: Vec<SourceFile>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SourcePost {
    pub fn new(id: impl Into<SourceId>, owner_id: impl Into<SourceId>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            html_url: None,
            title: None,
            description: None,
            private: false,
            files: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// True when every file carries inline content.
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|f| f.content.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceComment {
    pub id: SourceId,
    pub author: SourceUser,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A star: `user_id` starred `post_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSocialEdge {
    pub user_id: SourceId,
    pub post_id: SourceId,
}

/// A public SSH key registered on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceKey {
    pub id: SourceId,
    pub owner_id: SourceId,
    pub title: Option<String>,
    pub key: String,
}

/// Remaining request budget on a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    /// Quota reported by sources without request limits.
    pub fn unlimited() -> Self {
        Self {
            remaining: u32::MAX,
            reset_at: Utc::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.remaining == u32::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_display_and_serde() {
        assert_eq!(SourceId::from(42).to_string(), "42");
        assert_eq!(SourceId::from("abc123").to_string(), "abc123");
        assert_eq!(serde_json::to_string(&SourceId::from(7)).unwrap(), "7");
        let parsed: SourceId = serde_json::from_str("\"aa11\"").unwrap();
        assert_eq!(parsed, SourceId::from("aa11"));
    }

    #[test]
    fn test_source_user_hides_password_hash() {
        let mut user = SourceUser::new(1, "alice");
        user.password_hash = Some("$2b$10$secret".into());
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_post_completeness() {
        let mut post = SourcePost::new("abc", 1);
        post.files.push(SourceFile::new("main.rs", "fn main() {}"));
        assert!(post.is_complete());
        post.files.push(SourceFile {
            filename: "big.txt".into(),
            content: None,
            raw_url: Some("https://example.com/raw".into()),
            size: Some(1 << 20),
        });
        assert!(!post.is_complete());
    }

    #[test]
    fn test_file_size_from_content() {
        assert_eq!(SourceFile::new("a.txt", "hello").size, Some(5));
    }

    #[test]
    fn test_unlimited_quota() {
        assert!(Quota::unlimited().is_unlimited());
        let quota = Quota {
            remaining: 5,
            reset_at: Utc::now(),
        };
        assert!(!quota.is_unlimited());
    }
}
