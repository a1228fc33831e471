//! GitHub gists over the REST API.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

use domain::models::{
    EntityKind, Quota, SourceComment, SourceFile, SourceId, SourceKey, SourceKind, SourcePost,
    SourceSocialEdge, SourceUser,
};
use domain::services::SourceConnector;
use domain::MigrationError;

use super::http::{page_query, ApiClient, AuthScheme};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// GitHub's maximum page size for gist comments.
const COMMENTS_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
struct GhUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<GhUser> for SourceUser {
    fn from(user: GhUser) -> Self {
        Self {
            id: SourceId::Int(user.id),
            username: user.login,
            email: user.email,
            display_name: user.name,
            password_hash: None,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhFile {
    filename: Option<String>,
    raw_url: Option<String>,
    size: Option<i64>,
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GhGist {
    id: String,
    html_url: Option<String>,
    description: Option<String>,
    public: bool,
    owner: Option<GhUser>,
    #[serde(default)]
    files: BTreeMap<String, GhFile>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: i64,
    body: String,
    user: GhUser,
    created_at: Option<DateTime<Utc>>,
}

impl From<GhComment> for SourceComment {
    fn from(comment: GhComment) -> Self {
        Self {
            id: SourceId::Int(comment.id),
            author: comment.user.into(),
            body: comment.body,
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhKey {
    id: i64,
    key: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhRateLimit {
    resources: GhResources,
}

#[derive(Debug, Deserialize)]
struct GhResources {
    core: GhRate,
}

#[derive(Debug, Deserialize)]
struct GhRate {
    remaining: i64,
    reset: i64,
}

impl GhGist {
    fn into_post(self) -> SourcePost {
        let files = self
            .files
            .into_iter()
            .map(|(name, file)| SourceFile {
                filename: file.filename.unwrap_or(name),
                // Truncated content is incomplete; the detail fetch replaces it.
                content: if file.truncated { None } else { file.content },
                raw_url: file.raw_url,
                size: file.size,
            })
            .collect();

        SourcePost {
            id: SourceId::Str(self.id),
            owner_id: self
                .owner
                .map(|o| SourceId::Int(o.id))
                .unwrap_or(SourceId::Int(0)),
            html_url: self.html_url,
            title: None,
            description: self.description,
            private: !self.public,
            files,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub struct GitHubSource {
    api: ApiClient,
    username: String,
    account_id: OnceCell<SourceId>,
}

impl GitHubSource {
    pub fn new(
        api_url: &str,
        username: &str,
        token: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let api = ApiClient::new(
            api_url,
            &AuthScheme::Bearer(token.to_string()),
            GITHUB_ACCEPT,
            user_agent,
            timeout,
        )?;
        Ok(Self {
            api,
            username: username.to_string(),
            account_id: OnceCell::new(),
        })
    }

    /// Source ID of the configured account, fetched once.
    async fn account_id(&self) -> Result<SourceId, MigrationError> {
        self.account_id
            .get_or_try_init(|| async {
                let user = self.get_user(&self.username).await?;
                Ok::<_, MigrationError>(user.id)
            })
            .await
            .cloned()
    }

    async fn fill_truncated(&self, post: &mut SourcePost) -> Result<(), MigrationError> {
        for file in post.files.iter_mut().filter(|f| f.content.is_none()) {
            let Some(raw_url) = file.raw_url.clone() else {
                continue;
            };
            let content = self
                .api
                .get_text(&raw_url)
                .await
                .map_err(|e| e.for_item(EntityKind::File, format!("{}/{}", post.id, file.filename)))?;
            file.size = Some(content.len() as i64);
            file.content = Some(content);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SourceConnector for GitHubSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Github
    }

    async fn validate(&self) -> Result<(), MigrationError> {
        let me: GhUser = self
            .api
            .get_json("/user", &[])
            .await
            .map_err(|e| e.fatal("GitHub token check failed"))?;
        info!(login = %me.login, "GitHub token accepted");
        Ok(())
    }

    async fn list_users(&self, page: u32, _per_page: u32) -> Result<Vec<SourceUser>, MigrationError> {
        if page > 1 {
            return Ok(Vec::new());
        }
        let user = self
            .get_user(&self.username)
            .await
            .map_err(|e| MigrationError::Connection(format!("cannot load GitHub account: {}", e)))?;
        Ok(vec![user])
    }

    async fn get_user(&self, identifier: &str) -> Result<SourceUser, MigrationError> {
        let user: GhUser = self
            .api
            .get_json(&format!("/users/{}", identifier), &[])
            .await
            .map_err(|e| e.for_item(EntityKind::User, identifier))?;
        Ok(user.into())
    }

    async fn list_posts(
        &self,
        owner: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourcePost>, MigrationError> {
        let owner = owner.unwrap_or(&self.username);
        // Only the authenticated listing includes secret gists.
        let path = if owner == self.username {
            "/gists".to_string()
        } else {
            format!("/users/{}/gists", owner)
        };
        let gists: Vec<GhGist> = self
            .api
            .get_json(&path, &page_query(page, per_page))
            .await
            .map_err(|e| e.fatal("GitHub gist listing failed"))?;
        Ok(gists.into_iter().map(GhGist::into_post).collect())
    }

    async fn get_post_detail(&self, id: &SourceId) -> Result<SourcePost, MigrationError> {
        let gist: GhGist = self
            .api
            .get_json(&format!("/gists/{}", id), &[])
            .await
            .map_err(|e| e.for_item(EntityKind::Post, id))?;
        let mut post = gist.into_post();
        self.fill_truncated(&mut post).await?;
        Ok(post)
    }

    /// Every comment of a gist, reading pages until a short or empty one.
    async fn list_comments(&self, post_id: &SourceId) -> Result<Vec<SourceComment>, MigrationError> {
        let path = format!("/gists/{}/comments", post_id);
        let mut comments = Vec::new();
        let mut page = 1;

        loop {
            let batch: Vec<GhComment> = self
                .api
                .get_json(&path, &page_query(page, COMMENTS_PER_PAGE))
                .await
                .map_err(|e| e.for_item(EntityKind::Comment, post_id))?;
            let last = batch.len() < COMMENTS_PER_PAGE as usize;
            comments.extend(batch.into_iter().map(SourceComment::from));
            if last {
                break;
            }
            page += 1;
        }
        Ok(comments)
    }

    async fn list_keys(&self, page: u32, per_page: u32) -> Result<Vec<SourceKey>, MigrationError> {
        let owner_id = self.account_id().await?;
        let keys: Vec<GhKey> = self
            .api
            .get_json(
                &format!("/users/{}/keys", self.username),
                &page_query(page, per_page),
            )
            .await
            .map_err(|e| e.fatal("GitHub key listing failed"))?;
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
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourceSocialEdge>, MigrationError> {
        let user_id = self.account_id().await?;
        let gists: Vec<GhGist> = self
            .api
            .get_json("/gists/starred", &page_query(page, per_page))
            .await
            .map_err(|e| e.fatal("GitHub starred listing failed"))?;
        Ok(gists
            .into_iter()
            .map(|g| SourceSocialEdge {
                user_id: user_id.clone(),
                post_id: SourceId::Str(g.id),
            })
            .collect())
    }

    async fn count_posts(&self, _owner: Option<&str>) -> Result<Option<u64>, MigrationError> {
        Ok(None)
    }

    async fn get_quota(&self) -> Result<Quota, MigrationError> {
        let limits: GhRateLimit = self
            .api
            .get_json("/rate_limit", &[])
            .await
            .map_err(|e| e.fatal("GitHub rate limit query failed"))?;
        Ok(Quota {
            remaining: limits.resources.core.remaining.max(0) as u32,
            reset_at: Utc
                .timestamp_opt(limits.resources.core.reset, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    fn supports_comments(&self) -> bool {
        true
    }
}
