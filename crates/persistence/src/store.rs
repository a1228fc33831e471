//! `TargetStore` implementations.
//!
//! `PgTargetStore` writes through the repositories. `InMemoryTargetStore`
//! keeps the same constraints (unique usernames, existing references,
//! idempotent stars) in process memory and backs tests and local runs.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use domain::models::{
    MigrationSummary, NewComment, NewSnippet, NewSnippetFile, NewUser, TargetUser,
};
use domain::services::{StoreError, TargetStore};
use sqlx::PgPool;

use crate::repositories::{MigrationSummaryRepository, SnippetRepository, UserRepository};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Maps a sqlx error onto the store taxonomy.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return StoreError::Conflict(db_err.message().to_string()),
            Some(FOREIGN_KEY_VIOLATION) => {
                return StoreError::NotFound(db_err.message().to_string())
            }
            _ => {}
        }
    }
    tracing::warn!(error = %err, "Target store query failed");
    StoreError::Backend(err.to_string())
}

/// PostgreSQL target store.
#[derive(Clone)]
pub struct PgTargetStore {
    pool: PgPool,
    users: UserRepository,
    snippets: SnippetRepository,
    summaries: MigrationSummaryRepository,
}

impl PgTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            snippets: SnippetRepository::new(pool.clone()),
            summaries: MigrationSummaryRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TargetStore for PgTargetStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TargetUser>, StoreError> {
        self.users
            .find_by_username(username)
            .await
            .map(|user| user.map(TargetUser::from))
            .map_err(map_sqlx_error)
    }

    async fn create_user(&self, user: NewUser) -> Result<Uuid, StoreError> {
        self.users
            .create(&user)
            .await
            .map(|entity| entity.id)
            .map_err(map_sqlx_error)
    }

    async fn create_snippet(&self, snippet: NewSnippet) -> Result<Uuid, StoreError> {
        self.snippets
            .create(&snippet)
            .await
            .map(|entity| entity.id)
            .map_err(map_sqlx_error)
    }

    async fn create_file(&self, file: NewSnippetFile) -> Result<Uuid, StoreError> {
        self.snippets
            .create_file(&file)
            .await
            .map(|entity| entity.id)
            .map_err(map_sqlx_error)
    }

    async fn create_comment(&self, comment: NewComment) -> Result<Uuid, StoreError> {
        self.snippets
            .create_comment(&comment)
            .await
            .map(|entity| entity.id)
            .map_err(map_sqlx_error)
    }

    async fn create_star(&self, user_id: Uuid, snippet_id: Uuid) -> Result<bool, StoreError> {
        self.snippets
            .create_star(user_id, snippet_id)
            .await
            .map_err(map_sqlx_error)
    }

    async fn save_summary(&self, summary: &MigrationSummary) -> Result<(), StoreError> {
        self.summaries
            .upsert(summary)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn list_summaries(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MigrationSummary>, StoreError> {
        let rows = self
            .summaries
            .list(page as i64, per_page as i64)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter()
            .map(|row| MigrationSummary::try_from(row).map_err(StoreError::Backend))
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<(Uuid, NewUser)>,
    snippets: Vec<(Uuid, NewSnippet)>,
    files: Vec<(Uuid, NewSnippetFile)>,
    comments: Vec<(Uuid, NewComment)>,
    stars: HashSet<(Uuid, Uuid)>,
    summaries: HashMap<Uuid, MigrationSummary>,
    writes: u64,
}

/// In-process target store.
#[derive(Debug, Default)]
pub struct InMemoryTargetStore {
    state: RwLock<MemoryState>,
    rejected_usernames: HashSet<String>,
    unavailable: bool,
}

impl InMemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects `create_user` for this username with a backend error.
    pub fn rejecting_username(mut self, username: impl Into<String>) -> Self {
        self.rejected_usernames.insert(username.into());
        self
    }

    /// Every call fails, as if the database were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Seeds an existing account, bypassing the write counter.
    pub async fn seed_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.users.push((
            id,
            NewUser {
                username: username.to_string(),
                email: None,
                display_name: None,
                password_hash: None,
                created_at: None,
            },
        ));
        id
    }

    pub async fn users(&self) -> Vec<(Uuid, NewUser)> {
        self.state.read().await.users.clone()
    }

    pub async fn snippets(&self) -> Vec<(Uuid, NewSnippet)> {
        self.state.read().await.snippets.clone()
    }

    pub async fn files(&self) -> Vec<(Uuid, NewSnippetFile)> {
        self.state.read().await.files.clone()
    }

    pub async fn comments(&self) -> Vec<(Uuid, NewComment)> {
        self.state.read().await.comments.clone()
    }

    pub async fn star_count(&self) -> usize {
        self.state.read().await.stars.len()
    }

    pub async fn summary(&self, job_id: Uuid) -> Option<MigrationSummary> {
        self.state.read().await.summaries.get(&job_id).cloned()
    }

    /// Number of successful create calls.
    pub async fn write_count(&self) -> u64 {
        self.state.read().await.writes
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Backend("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TargetUser>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|(_, user)| user.username == username)
            .map(|(id, user)| TargetUser {
                id: *id,
                username: user.username.clone(),
            }))
    }

    async fn create_user(&self, user: NewUser) -> Result<Uuid, StoreError> {
        self.check_available()?;
        if self.rejected_usernames.contains(&user.username) {
            return Err(StoreError::Backend(format!(
                "rejected username {}",
                user.username
            )));
        }
        let mut state = self.state.write().await;
        if state.users.iter().any(|(_, u)| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }
        let id = Uuid::new_v4();
        state.users.push((id, user));
        state.writes += 1;
        Ok(id)
    }

    async fn create_snippet(&self, snippet: NewSnippet) -> Result<Uuid, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.users.iter().any(|(id, _)| *id == snippet.owner_id) {
            return Err(StoreError::NotFound(format!("user {}", snippet.owner_id)));
        }
        let id = Uuid::new_v4();
        state.snippets.push((id, snippet));
        state.writes += 1;
        Ok(id)
    }

    async fn create_file(&self, file: NewSnippetFile) -> Result<Uuid, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.snippets.iter().any(|(id, _)| *id == file.snippet_id) {
            return Err(StoreError::NotFound(format!("snippet {}", file.snippet_id)));
        }
        if state
            .files
            .iter()
            .any(|(_, f)| f.snippet_id == file.snippet_id && f.filename == file.filename)
        {
            return Err(StoreError::Conflict(format!(
                "file {} already exists",
                file.filename
            )));
        }
        let id = Uuid::new_v4();
        state.files.push((id, file));
        state.writes += 1;
        Ok(id)
    }

    async fn create_comment(&self, comment: NewComment) -> Result<Uuid, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.snippets.iter().any(|(id, _)| *id == comment.snippet_id) {
            return Err(StoreError::NotFound(format!("snippet {}", comment.snippet_id)));
        }
        if !state.users.iter().any(|(id, _)| *id == comment.author_id) {
            return Err(StoreError::NotFound(format!("user {}", comment.author_id)));
        }
        let id = Uuid::new_v4();
        state.comments.push((id, comment));
        state.writes += 1;
        Ok(id)
    }

    async fn create_star(&self, user_id: Uuid, snippet_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.users.iter().any(|(id, _)| *id == user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        if !state.snippets.iter().any(|(id, _)| *id == snippet_id) {
            return Err(StoreError::NotFound(format!("snippet {}", snippet_id)));
        }
        let inserted = state.stars.insert((user_id, snippet_id));
        if inserted {
            state.writes += 1;
        }
        Ok(inserted)
    }

    async fn save_summary(&self, summary: &MigrationSummary) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .write()
            .await
            .summaries
            .insert(summary.job_id, summary.clone());
        Ok(())
    }

    async fn list_summaries(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MigrationSummary>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut summaries: Vec<_> = state.summaries.values().cloned().collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let skip = (page.max(1) as usize - 1) * per_page as usize;
        Ok(summaries
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::models::{JobKind, JobStatus};
    use fake::{faker::internet::en::Username, Fake};

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: None,
            display_name: None,
            password_hash: None,
            created_at: None,
        }
    }

    fn new_snippet(owner_id: Uuid) -> NewSnippet {
        NewSnippet {
            owner_id,
            title: Some("hello".into()),
            description: None,
            private: false,
            source_url: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_usernames_are_unique() {
        let username: String = Username().fake();
        let store = InMemoryTargetStore::new();
        store.create_user(new_user(&username)).await.unwrap();
        let err = store.create_user(new_user(&username)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_snippet_requires_owner() {
        let store = InMemoryTargetStore::new();
        let err = store.create_snippet(new_snippet(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stars_are_idempotent() {
        let store = InMemoryTargetStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let snippet = store.create_snippet(new_snippet(user)).await.unwrap();

        assert!(store.create_star(user, snippet).await.unwrap());
        assert!(!store.create_star(user, snippet).await.unwrap());
        assert_eq!(store.star_count().await, 1);
    }

    #[tokio::test]
    async fn test_find_user_after_seed() {
        let store = InMemoryTargetStore::new();
        let id = store.seed_user("bob").await;
        let found = store.find_user_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.find_user_by_username("carol").await.unwrap().is_none());
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_username() {
        let store = InMemoryTargetStore::new().rejecting_username("mallory");
        let err = store.create_user(new_user("mallory")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_summaries_newest_first_and_paged() {
        let store = InMemoryTargetStore::new();
        let now = Utc::now();
        for offset in 0..3 {
            let summary = MigrationSummary {
                job_id: Uuid::new_v4(),
                kind: JobKind::RemoteImport,
                status: JobStatus::Completed,
                source_url: "https://api.github.com".into(),
                items_total: offset,
                items_imported: offset,
                error_count: 0,
                settings: serde_json::json!({}),
                started_at: now + Duration::seconds(offset),
                completed_at: Some(now),
            };
            store.save_summary(&summary).await.unwrap();
        }

        let first = store.list_summaries(1, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].items_total, 2);
        assert_eq!(first[1].items_total, 1);
        let second = store.list_summaries(2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].items_total, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryTargetStore::unavailable();
        assert!(store.ping().await.is_err());
        assert!(store.find_user_by_username("a").await.is_err());
    }
}
