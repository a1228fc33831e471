//! Target store used by dry runs.
//!
//! Reads go to the real store so existing accounts are matched exactly as a
//! live run would match them. Creates mint fresh IDs and write nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use domain::models::{
    MigrationSummary, NewComment, NewSnippet, NewSnippetFile, NewUser, TargetUser,
};
use domain::services::{StoreError, TargetStore};

pub struct DryRunStore {
    inner: Arc<dyn TargetStore>,
    /// Accounts "created" during this run, so later lookups see them.
    minted_users: RwLock<HashMap<String, Uuid>>,
}

impl DryRunStore {
    pub fn new(inner: Arc<dyn TargetStore>) -> Self {
        Self {
            inner,
            minted_users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl TargetStore for DryRunStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TargetUser>, StoreError> {
        if let Some(id) = self.minted_users.read().await.get(username) {
            return Ok(Some(TargetUser {
                id: *id,
                username: username.to_string(),
            }));
        }
        self.inner.find_user_by_username(username).await
    }

    async fn create_user(&self, user: NewUser) -> Result<Uuid, StoreError> {
        let mut minted = self.minted_users.write().await;
        if minted.contains_key(&user.username) {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }
        let id = Uuid::new_v4();
        minted.insert(user.username, id);
        Ok(id)
    }

    async fn create_snippet(&self, _snippet: NewSnippet) -> Result<Uuid, StoreError> {
        Ok(Uuid::new_v4())
    }

    async fn create_file(&self, _file: NewSnippetFile) -> Result<Uuid, StoreError> {
        Ok(Uuid::new_v4())
    }

    async fn create_comment(&self, _comment: NewComment) -> Result<Uuid, StoreError> {
        Ok(Uuid::new_v4())
    }

    async fn create_star(&self, _user_id: Uuid, _snippet_id: Uuid) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn save_summary(&self, _summary: &MigrationSummary) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_summaries(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MigrationSummary>, StoreError> {
        self.inner.list_summaries(page, per_page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::InMemoryTargetStore;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: None,
            display_name: None,
            password_hash: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_writes_never_reach_inner_store() {
        let inner = Arc::new(InMemoryTargetStore::new());
        let store = DryRunStore::new(inner.clone());

        let owner = store.create_user(new_user("alice")).await.unwrap();
        store
            .create_snippet(NewSnippet {
                owner_id: owner,
                title: None,
                description: None,
                private: false,
                source_url: None,
                created_at: None,
                updated_at: None,
            })
            .await
            .unwrap();

        assert_eq!(inner.write_count().await, 0);
        assert!(inner.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_sees_existing_and_minted_users() {
        let inner = Arc::new(InMemoryTargetStore::new());
        let existing = inner.seed_user("bob").await;
        let store = DryRunStore::new(inner);

        let found = store.find_user_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.id, existing);

        let minted = store.create_user(new_user("carol")).await.unwrap();
        let found = store.find_user_by_username("carol").await.unwrap().unwrap();
        assert_eq!(found.id, minted);

        let duplicate = store.create_user(new_user("carol")).await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
    }
}
