//! Snippet repository: snippets, files, comments and stars.

use sqlx::PgPool;
use uuid::Uuid;

use domain::models::{NewComment, NewSnippet, NewSnippetFile};

use crate::entities::{SnippetCommentEntity, SnippetEntity, SnippetFileEntity};
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct SnippetRepository {
    pool: PgPool,
}

impl SnippetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, snippet: &NewSnippet) -> Result<SnippetEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_snippet");
        let result = sqlx::query_as::<_, SnippetEntity>(
            r#"
            INSERT INTO snippets (owner_id, title, description, private, source_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()), COALESCE($7, $6, NOW()))
            RETURNING id, owner_id, title, description, private, source_url, created_at, updated_at
            "#,
        )
        .bind(snippet.owner_id)
        .bind(&snippet.title)
        .bind(&snippet.description)
        .bind(snippet.private)
        .bind(&snippet.source_url)
        .bind(snippet.created_at)
        .bind(snippet.updated_at)
        .fetch_one(&self.pool)
        .await;
        timer.finish(result)
    }

    pub async fn create_file(&self, file: &NewSnippetFile) -> Result<SnippetFileEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_snippet_file");
        let result = sqlx::query_as::<_, SnippetFileEntity>(
            r#"
            INSERT INTO snippet_files (snippet_id, filename, content, language, size_bytes, content_sha256)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, snippet_id, filename, content, language, size_bytes, content_sha256, created_at
            "#,
        )
        .bind(file.snippet_id)
        .bind(&file.filename)
        .bind(&file.content)
        .bind(&file.language)
        .bind(file.size_bytes)
        .bind(&file.content_sha256)
        .fetch_one(&self.pool)
        .await;
        timer.finish(result)
    }

    pub async fn create_comment(
        &self,
        comment: &NewComment,
    ) -> Result<SnippetCommentEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_snippet_comment");
        let result = sqlx::query_as::<_, SnippetCommentEntity>(
            r#"
            INSERT INTO snippet_comments (snippet_id, author_id, body, created_at)
            VALUES ($1, $2, $3, COALESCE($4, NOW()))
            RETURNING id, snippet_id, author_id, body, created_at
            "#,
        )
        .bind(comment.snippet_id)
        .bind(comment.author_id)
        .bind(&comment.body)
        .bind(comment.created_at)
        .fetch_one(&self.pool)
        .await;
        timer.finish(result)
    }

    /// Stars a snippet. Returns false when the star already existed.
    pub async fn create_star(&self, user_id: Uuid, snippet_id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("create_snippet_star");
        let result = sqlx::query(
            r#"
            INSERT INTO snippet_stars (user_id, snippet_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, snippet_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(snippet_id)
        .execute(&self.pool)
        .await;
        Ok(timer.finish(result)?.rows_affected() > 0)
    }
}
