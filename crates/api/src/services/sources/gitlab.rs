//! GitLab personal snippets over the v4 REST API.
//!
//! Personal snippets have no comment or star endpoints, so those stages see
//! empty listings. Quota comes from the `RateLimit-*` headers of the last
//! response.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use domain::models::{
    EntityKind, Quota, SourceComment, SourceFile, SourceId, SourceKey, SourceKind, SourcePost,
    SourceSocialEdge, SourceUser,
};
use domain::services::SourceConnector;
use domain::MigrationError;

use super::http::{page_query, ApiClient, AuthScheme};

/// Ref used when a file's `raw_url` does not name one.
const DEFAULT_SNIPPET_REF: &str = "main";

/// The ref in a snippet file's web raw URL,
/// `.../snippets/<id>/raw/<ref>/<path>`.
fn ref_from_raw_url(raw_url: &str) -> Option<String> {
    let url = Url::parse(raw_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    let raw = segments
        .windows(3)
        .position(|w| w[0] == "snippets" && w[2] == "raw")?
        + 2;
    segments
        .get(raw + 1)
        .filter(|r| !r.is_empty() && !r.contains('%'))
        .map(|r| r.to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct GlUser {
    id: i64,
    username: String,
    name: Option<String>,
    #[serde(default)]
    public_email: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<GlUser> for SourceUser {
    fn from(user: GlUser) -> Self {
        Self {
            id: SourceId::Int(user.id),
            username: user.username,
            email: user.public_email.filter(|e| !e.is_empty()),
            display_name: user.name,
            password_hash: None,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlSnippetFile {
    path: String,
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlSnippet {
    id: i64,
    title: Option<String>,
    description: Option<String>,
    visibility: String,
    author: GlUser,
    web_url: Option<String>,
    #[serde(default)]
    files: Vec<GlSnippetFile>,
    file_name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl GlSnippet {
    fn into_post(self) -> SourcePost {
        let mut files: Vec<SourceFile> = self
            .files
            .into_iter()
            .map(|f| SourceFile {
                filename: f.path,
                content: None,
                raw_url: f.raw_url,
                size: None,
            })
            .collect();

        // Snippets created before multi-file support only carry `file_name`.
        if files.is_empty() {
            if let Some(name) = self.file_name.filter(|n| !n.is_empty()) {
                files.push(SourceFile {
                    filename: name,
                    content: None,
                    raw_url: None,
                    size: None,
                });
            }
        }

        SourcePost {
            id: SourceId::Int(self.id),
            owner_id: SourceId::Int(self.author.id),
            html_url: self.web_url,
            title: self.title,
            description: self.description,
            private: self.visibility != "public",
            files,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlKey {
    id: i64,
    title: Option<String>,
    key: String,
}

pub struct GitLabSource {
    api: ApiClient,
    api_base: Url,
    username: String,
    account_id: OnceCell<SourceId>,
}

impl GitLabSource {
    pub fn new(
        base_url: &str,
        username: &str,
        token: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let api_base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| MigrationError::InvalidSettings(format!("invalid GitLab URL: {}", e)))?;
        if api_base.cannot_be_a_base() {
            return Err(MigrationError::InvalidSettings(
                "invalid GitLab URL: not a base URL".into(),
            ));
        }
        let api = ApiClient::new(
            base_url,
            &AuthScheme::PrivateToken(token.to_string()),
            "application/json",
            user_agent,
            timeout,
        )?;
        Ok(Self {
            api,
            api_base,
            username: username.to_string(),
            account_id: OnceCell::new(),
        })
    }

    /// URL of one file's raw content at `git_ref`; the file path is a single
    /// encoded segment.
    fn raw_file_url(&self, snippet_id: &SourceId, git_ref: &str, path: &str) -> String {
        let id = snippet_id.to_string();
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "api",
                "v4",
                "snippets",
                id.as_str(),
                "files",
                git_ref,
                path,
                "raw",
            ]);
        }
        url.to_string()
    }

    async fn account_id(&self) -> Result<SourceId, MigrationError> {
        self.account_id
            .get_or_try_init(|| async {
                let user = self.get_user(&self.username).await?;
                Ok::<_, MigrationError>(user.id)
            })
            .await
            .cloned()
    }
}

#[async_trait::async_trait]
impl SourceConnector for GitLabSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gitlab
    }

    async fn validate(&self) -> Result<(), MigrationError> {
        let me: GlUser = self
            .api
            .get_json("/api/v4/user", &[])
            .await
            .map_err(|e| e.fatal("GitLab token check failed"))?;
        info!(username = %me.username, "GitLab token accepted");
        Ok(())
    }

    async fn list_users(&self, page: u32, _per_page: u32) -> Result<Vec<SourceUser>, MigrationError> {
        if page > 1 {
            return Ok(Vec::new());
        }
        let user = self
            .get_user(&self.username)
            .await
            .map_err(|e| MigrationError::Connection(format!("cannot load GitLab account: {}", e)))?;
        Ok(vec![user])
    }

    async fn get_user(&self, identifier: &str) -> Result<SourceUser, MigrationError> {
        let users: Vec<GlUser> = self
            .api
            .get_json("/api/v4/users", &[("username", identifier.to_string())])
            .await
            .map_err(|e| e.for_item(EntityKind::User, identifier))?;
        users
            .into_iter()
            .next()
            .map(SourceUser::from)
            .ok_or_else(|| MigrationError::item_fetch(EntityKind::User, identifier, "user not found"))
    }

    async fn list_posts(
        &self,
        _owner: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourcePost>, MigrationError> {
        let snippets: Vec<GlSnippet> = self
            .api
            .get_json("/api/v4/snippets", &page_query(page, per_page))
            .await
            .map_err(|e| e.fatal("GitLab snippet listing failed"))?;
        Ok(snippets.into_iter().map(GlSnippet::into_post).collect())
    }

    async fn get_post_detail(&self, id: &SourceId) -> Result<SourcePost, MigrationError> {
        let snippet: GlSnippet = self
            .api
            .get_json(&format!("/api/v4/snippets/{}", id), &[])
            .await
            .map_err(|e| e.for_item(EntityKind::Post, id))?;
        let legacy_single_file = snippet.files.is_empty();
        let mut post = snippet.into_post();

        for file in post.files.iter_mut() {
            let url = if legacy_single_file {
                self.api.url(&format!("/api/v4/snippets/{}/raw", id))
            } else {
                let git_ref = file
                    .raw_url
                    .as_deref()
                    .and_then(ref_from_raw_url)
                    .unwrap_or_else(|| DEFAULT_SNIPPET_REF.to_string());
                self.raw_file_url(id, &git_ref, &file.filename)
            };
            let content = self
                .api
                .get_text(&url)
                .await
                .map_err(|e| e.for_item(EntityKind::File, format!("{}/{}", id, file.filename)))?;
            file.size = Some(content.len() as i64);
            file.content = Some(content);
        }
        Ok(post)
    }

    async fn list_comments(&self, _post_id: &SourceId) -> Result<Vec<SourceComment>, MigrationError> {
        Ok(Vec::new())
    }

    async fn list_keys(&self, page: u32, per_page: u32) -> Result<Vec<SourceKey>, MigrationError> {
        let owner_id = self.account_id().await?;
        let keys: Vec<GlKey> = self
            .api
            .get_json("/api/v4/user/keys", &page_query(page, per_page))
            .await
            .map_err(|e| e.fatal("GitLab key listing failed"))?;
        Ok(keys
            .into_iter()
            .map(|k| SourceKey {
                id: SourceId::Int(k.id),
                owner_id: owner_id.clone(),
                title: k.title,
                key: k.key,
            })
            .collect())
    }

    async fn list_stars(
        &self,
        _page: u32,
        _per_page: u32,
    ) -> Result<Vec<SourceSocialEdge>, MigrationError> {
        Ok(Vec::new())
    }

    async fn count_posts(&self, _owner: Option<&str>) -> Result<Option<u64>, MigrationError> {
        Ok(None)
    }

    async fn get_quota(&self) -> Result<Quota, MigrationError> {
        Ok(self.api.last_quota().unwrap_or_else(Quota::unlimited))
    }

    fn supports_comments(&self) -> bool {
        false
    }
}
