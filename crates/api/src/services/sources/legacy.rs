//! Direct reads from a legacy instance's PostgreSQL schema.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use domain::models::{
    EntityKind, Quota, SourceComment, SourceFile, SourceId, SourceKey, SourceKind, SourcePost,
    SourceSocialEdge, SourceUser,
};
use domain::services::SourceConnector;
use domain::MigrationError;
use persistence::db::{create_pool, DatabaseConfig};
use shared::validation::normalize_base_url;

/// Tables that must exist before anything is read.
pub const REQUIRED_TABLES: [&str; 5] = ["users", "gists", "gist_files", "stars", "ssh_keys"];

/// Columns the reads below select, as `(table, column)`.
pub const REQUIRED_COLUMNS: [(&str, &str); 22] = [
    ("users", "id"),
    ("users", "username"),
    ("users", "email"),
    ("users", "display_name"),
    ("users", "password_hash"),
    ("users", "created_at"),
    ("gists", "id"),
    ("gists", "user_id"),
    ("gists", "title"),
    ("gists", "description"),
    ("gists", "public"),
    ("gists", "created_at"),
    ("gists", "updated_at"),
    ("gist_files", "gist_id"),
    ("gist_files", "filename"),
    ("gist_files", "content"),
    ("stars", "user_id"),
    ("stars", "gist_id"),
    ("ssh_keys", "id"),
    ("ssh_keys", "user_id"),
    ("ssh_keys", "title"),
    ("ssh_keys", "key"),
];

#[derive(Debug, FromRow)]
struct LegacyUserRow {
    id: i64,
    username: String,
    email: Option<String>,
    display_name: Option<String>,
    password_hash: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<LegacyUserRow> for SourceUser {
    fn from(row: LegacyUserRow) -> Self {
        Self {
            id: SourceId::Int(row.id),
            username: row.username,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct LegacyGistRow {
    id: String,
    user_id: i64,
    owner_username: Option<String>,
    title: Option<String>,
    description: Option<String>,
    public: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct LegacyFileRow {
    gist_id: String,
    filename: String,
    content: Option<String>,
}

impl LegacyFileRow {
    /// A NULL content column yields a file without content, which is
    /// skipped and recorded when the post is written.
    fn into_file(self) -> (String, SourceFile) {
        let size = self.content.as_ref().map(|c| c.len() as i64);
        let file = SourceFile {
            filename: self.filename,
            content: self.content,
            raw_url: None,
            size,
        };
        (self.gist_id, file)
    }
}

#[derive(Debug, FromRow)]
struct LegacyKeyRow {
    id: i64,
    user_id: i64,
    title: Option<String>,
    key: String,
}

#[derive(Debug, FromRow)]
struct LegacyStarRow {
    user_id: i64,
    gist_id: String,
}

/// Postgres `undefined_table` and `undefined_column`.
const SHAPE_ERROR_CODES: [&str; 2] = ["42P01", "42703"];

/// Rows that do not decode, or queries naming relations that do not exist,
/// are a schema mismatch. Everything else means the database is unusable.
fn query_failed(err: sqlx::Error) -> MigrationError {
    let shape_mismatch = match &err {
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| SHAPE_ERROR_CODES.contains(&code.as_ref())),
        _ => false,
    };

    if shape_mismatch {
        MigrationError::SchemaValidation(format!("legacy schema mismatch: {}", err))
    } else {
        MigrationError::Connection(format!("legacy query failed: {}", err))
    }
}

/// Required columns absent from `present`, as `table.column`.
fn missing_columns(present: &[(String, String)]) -> Vec<String> {
    REQUIRED_COLUMNS
        .iter()
        .filter(|(table, column)| !present.iter().any(|(t, c)| t == table && c == column))
        .map(|(table, column)| format!("{}.{}", table, column))
        .collect()
}

fn offset(page: u32, per_page: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(per_page)
}

/// Connector over a legacy database, scoped to one job.
pub struct LegacySource {
    pool: PgPool,
    web_url: Option<String>,
}

impl LegacySource {
    /// Opens a small job-scoped pool. Failure to connect is fatal.
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
        web_url: Option<&str>,
    ) -> Result<Self, MigrationError> {
        let config = DatabaseConfig::scoped(connection_string, max_connections);
        let pool = create_pool(&config)
            .await
            .map_err(|e| MigrationError::Connection(format!("cannot reach legacy database: {}", e)))?;
        Ok(Self::from_pool(pool, web_url))
    }

    pub fn from_pool(pool: PgPool, web_url: Option<&str>) -> Self {
        Self {
            pool,
            web_url: web_url.map(normalize_base_url).filter(|u| !u.is_empty()),
        }
    }

    fn post_url(&self, owner: Option<&str>, id: &str) -> Option<String> {
        match (&self.web_url, owner) {
            (Some(base), Some(owner)) => Some(format!("{}/{}/{}", base, owner, id)),
            _ => None,
        }
    }

    async fn files_for(&self, gist_ids: &[String]) -> Result<HashMap<String, Vec<SourceFile>>, sqlx::Error> {
        let rows = sqlx::query_as::<_, LegacyFileRow>(
            r#"
            SELECT gist_id, filename, content
            FROM gist_files
            WHERE gist_id = ANY($1)
            ORDER BY gist_id, filename
            "#,
        )
        .bind(gist_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut files: HashMap<String, Vec<SourceFile>> = HashMap::new();
        for row in rows {
            let (gist_id, file) = row.into_file();
            files.entry(gist_id).or_default().push(file);
        }
        Ok(files)
    }

    fn to_post(&self, row: LegacyGistRow, files: Vec<SourceFile>) -> SourcePost {
        SourcePost {
            html_url: self.post_url(row.owner_username.as_deref(), &row.id),
            id: SourceId::Str(row.id),
            owner_id: SourceId::Int(row.user_id),
            title: row.title,
            description: row.description,
            private: !row.public,
            files,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl SourceConnector for LegacySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Legacy
    }

    async fn validate(&self) -> Result<(), MigrationError> {
        let required: Vec<String> = REQUIRED_TABLES.iter().map(|t| t.to_string()).collect();
        let present: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_name = ANY($1)
            "#,
        )
        .bind(&required)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let missing: Vec<&str> = REQUIRED_TABLES
            .iter()
            .copied()
            .filter(|table| !present.iter().any(|p| p == table))
            .collect();

        if !missing.is_empty() {
            return Err(MigrationError::SchemaValidation(format!(
                "missing tables: {}",
                missing.join(", ")
            )));
        }

        let columns: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT table_name::text, column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = ANY($1)
            "#,
        )
        .bind(&required)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let missing = missing_columns(&columns);
        if !missing.is_empty() {
            return Err(MigrationError::SchemaValidation(format!(
                "missing columns: {}",
                missing.join(", ")
            )));
        }

        info!("Legacy schema validated");
        Ok(())
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<SourceUser>, MigrationError> {
        let rows = sqlx::query_as::<_, LegacyUserRow>(
            r#"
            SELECT id, username, email, display_name, password_hash, created_at
            FROM users
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(per_page))
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows.into_iter().map(SourceUser::from).collect())
    }

    async fn get_user(&self, identifier: &str) -> Result<SourceUser, MigrationError> {
        let row = sqlx::query_as::<_, LegacyUserRow>(
            r#"
            SELECT id, username, email, display_name, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.map(SourceUser::from)
            .ok_or_else(|| MigrationError::item_fetch(EntityKind::User, identifier, "user not found"))
    }

    async fn list_posts(
        &self,
        owner: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourcePost>, MigrationError> {
        let rows = sqlx::query_as::<_, LegacyGistRow>(
            r#"
            SELECT g.id, g.user_id, u.username AS owner_username, g.title, g.description,
                   g.public, g.created_at, g.updated_at
            FROM gists g
            LEFT JOIN users u ON u.id = g.user_id
            WHERE ($1::text IS NULL OR u.username = $1)
            ORDER BY g.created_at NULLS FIRST, g.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(i64::from(per_page))
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut files = self.files_for(&ids).await.map_err(query_failed)?;
        debug!(page, count = rows.len(), "Fetched legacy gist page");

        Ok(rows
            .into_iter()
            .map(|row| {
                let post_files = files.remove(&row.id).unwrap_or_default();
                self.to_post(row, post_files)
            })
            .collect())
    }

    async fn get_post_detail(&self, id: &SourceId) -> Result<SourcePost, MigrationError> {
        let key = id.to_string();
        let row = sqlx::query_as::<_, LegacyGistRow>(
            r#"
            SELECT g.id, g.user_id, u.username AS owner_username, g.title, g.description,
                   g.public, g.created_at, g.updated_at
            FROM gists g
            LEFT JOIN users u ON u.id = g.user_id
            WHERE g.id = $1
            "#,
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MigrationError::item_fetch(EntityKind::Post, &key, e))?
        .ok_or_else(|| MigrationError::item_fetch(EntityKind::Post, &key, "gist not found"))?;

        let mut files = self
            .files_for(std::slice::from_ref(&key))
            .await
            .map_err(|e| MigrationError::item_fetch(EntityKind::Post, &key, e))?;
        let post_files = files.remove(&key).unwrap_or_default();
        Ok(self.to_post(row, post_files))
    }

    async fn list_comments(&self, _post_id: &SourceId) -> Result<Vec<SourceComment>, MigrationError> {
        Ok(Vec::new())
    }

    async fn list_keys(&self, page: u32, per_page: u32) -> Result<Vec<SourceKey>, MigrationError> {
        let rows = sqlx::query_as::<_, LegacyKeyRow>(
            r#"
            SELECT id, user_id, title, key
            FROM ssh_keys
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(per_page))
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows
            .into_iter()
            .map(|row| SourceKey {
                id: SourceId::Int(row.id),
                owner_id: SourceId::Int(row.user_id),
                title: row.title,
                key: row.key,
            })
            .collect())
    }

    async fn list_stars(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourceSocialEdge>, MigrationError> {
        let rows = sqlx::query_as::<_, LegacyStarRow>(
            r#"
            SELECT user_id, gist_id
            FROM stars
            ORDER BY user_id, gist_id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(per_page))
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows
            .into_iter()
            .map(|row| SourceSocialEdge {
                user_id: SourceId::Int(row.user_id),
                post_id: SourceId::Str(row.gist_id),
            })
            .collect())
    }

    async fn count_posts(&self, owner: Option<&str>) -> Result<Option<u64>, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM gists g
            LEFT JOIN users u ON u.id = g.user_id
            WHERE ($1::text IS NULL OR u.username = $1)
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(Some(count.max(0) as u64))
    }

    async fn get_quota(&self) -> Result<Quota, MigrationError> {
        Ok(Quota::unlimited())
    }

    fn supports_comments(&self) -> bool {
        false
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Legacy source pool closed");
    }
}
