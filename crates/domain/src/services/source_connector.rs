//! Uniform read surface over a source system.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::MigrationError;
use crate::models::{
    EntityKind, Quota, SourceComment, SourceId, SourceKey, SourceKind, SourcePost,
    SourceSocialEdge, SourceUser,
};

/// Capabilities every source variant provides.
///
/// List operations take 1-based pages; an empty page means the listing is
/// exhausted.
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Checks credentials or schema before any read. Failures are fatal.
    async fn validate(&self) -> Result<(), MigrationError>;

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<SourceUser>, MigrationError>;

    async fn get_user(&self, identifier: &str) -> Result<SourceUser, MigrationError>;

    /// Lists posts, optionally restricted to one owner's handle.
    async fn list_posts(
        &self,
        owner: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourcePost>, MigrationError>;

    /// Fetches a post with inline file contents.
    async fn get_post_detail(&self, id: &SourceId) -> Result<SourcePost, MigrationError>;

    async fn list_comments(&self, post_id: &SourceId) -> Result<Vec<SourceComment>, MigrationError>;

    async fn list_keys(&self, page: u32, per_page: u32) -> Result<Vec<SourceKey>, MigrationError>;

    async fn list_stars(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourceSocialEdge>, MigrationError>;

    /// Number of posts, when the source can tell up front.
    async fn count_posts(&self, owner: Option<&str>) -> Result<Option<u64>, MigrationError>;

    async fn get_quota(&self) -> Result<Quota, MigrationError>;

    fn supports_comments(&self) -> bool;

    /// Releases job-scoped resources. Called on every exit path.
    async fn close(&self) {}
}

fn page_slice<T: Clone>(items: &[T], page: u32, per_page: u32) -> Vec<T> {
    if page == 0 || per_page == 0 {
        return Vec::new();
    }
    let start = (page as usize - 1).saturating_mul(per_page as usize);
    items
        .iter()
        .skip(start)
        .take(per_page as usize)
        .cloned()
        .collect()
}

/// In-memory source for tests and local experiments.
///
/// Quotas are served in order, the last one repeating. Failures can be
/// injected for validation, single post details and single comment lists.
/// A post detail can also be rate limited a fixed number of times.
#[derive(Debug)]
pub struct StaticSourceConnector {
    kind: SourceKind,
    users: Vec<SourceUser>,
    posts: Vec<SourcePost>,
    comments: HashMap<String, Vec<SourceComment>>,
    keys: Vec<SourceKey>,
    stars: Vec<SourceSocialEdge>,
    quotas: Mutex<VecDeque<Quota>>,
    validate_error: Option<MigrationError>,
    failing_posts: HashSet<String>,
    failing_comments: HashSet<String>,
    rate_limited_posts: Mutex<HashMap<String, (u32, DateTime<Utc>)>>,
    page_delay: Option<Duration>,
    comments_supported: bool,
    page_fetches: AtomicUsize,
    closed: AtomicBool,
}

impl StaticSourceConnector {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            users: Vec::new(),
            posts: Vec::new(),
            comments: HashMap::new(),
            keys: Vec::new(),
            stars: Vec::new(),
            quotas: Mutex::new(VecDeque::new()),
            validate_error: None,
            failing_posts: HashSet::new(),
            failing_comments: HashSet::new(),
            rate_limited_posts: Mutex::new(HashMap::new()),
            page_delay: None,
            comments_supported: kind.is_remote(),
            page_fetches: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_users(mut self, users: Vec<SourceUser>) -> Self {
        self.users = users;
        self
    }

    pub fn with_posts(mut self, posts: Vec<SourcePost>) -> Self {
        self.posts = posts;
        self
    }

    pub fn with_comments(mut self, post_id: impl Into<SourceId>, comments: Vec<SourceComment>) -> Self {
        self.comments.insert(post_id.into().to_string(), comments);
        self
    }

    pub fn with_keys(mut self, keys: Vec<SourceKey>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_stars(mut self, stars: Vec<SourceSocialEdge>) -> Self {
        self.stars = stars;
        self
    }

    pub fn with_quotas(self, quotas: Vec<Quota>) -> Self {
        if let Ok(mut queue) = self.quotas.lock() {
            queue.extend(quotas);
        }
        self
    }

    pub fn with_validate_error(mut self, err: MigrationError) -> Self {
        self.validate_error = Some(err);
        self
    }

    pub fn with_failing_post(mut self, id: impl Into<SourceId>) -> Self {
        self.failing_posts.insert(id.into().to_string());
        self
    }

    pub fn with_failing_comments(mut self, post_id: impl Into<SourceId>) -> Self {
        self.failing_comments.insert(post_id.into().to_string());
        self
    }

    /// The first `times` detail fetches of the post are rejected as rate
    /// limited until `reset_at`.
    pub fn with_rate_limited_post(
        self,
        id: impl Into<SourceId>,
        times: u32,
        reset_at: DateTime<Utc>,
    ) -> Self {
        if let Ok(mut limited) = self.rate_limited_posts.lock() {
            limited.insert(id.into().to_string(), (times, reset_at));
        }
        self
    }

    /// Delays every post page fetch.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    pub fn with_comments_supported(mut self, supported: bool) -> Self {
        self.comments_supported = supported;
        self
    }

    /// Number of post pages fetched so far.
    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn owner_id(&self, owner: &str) -> Option<&SourceId> {
        self.users
            .iter()
            .find(|u| u.username == owner)
            .map(|u| &u.id)
    }

    fn owned_posts(&self, owner: Option<&str>) -> Vec<SourcePost> {
        match owner {
            None => self.posts.clone(),
            Some(owner) => match self.owner_id(owner) {
                Some(id) => self
                    .posts
                    .iter()
                    .filter(|p| &p.owner_id == id)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

#[async_trait::async_trait]
impl SourceConnector for StaticSourceConnector {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn validate(&self) -> Result<(), MigrationError> {
        match &self.validate_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<SourceUser>, MigrationError> {
        Ok(page_slice(&self.users, page, per_page))
    }

    async fn get_user(&self, identifier: &str) -> Result<SourceUser, MigrationError> {
        self.users
            .iter()
            .find(|u| u.username == identifier || u.id.to_string() == identifier)
            .cloned()
            .ok_or_else(|| MigrationError::item_fetch(EntityKind::User, identifier, "user not found"))
    }

    async fn list_posts(
        &self,
        owner: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourcePost>, MigrationError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(page_slice(&self.owned_posts(owner), page, per_page))
    }

    async fn get_post_detail(&self, id: &SourceId) -> Result<SourcePost, MigrationError> {
        if self.failing_posts.contains(&id.to_string()) {
            return Err(MigrationError::item_fetch(EntityKind::Post, id, "injected failure"));
        }
        if let Ok(mut limited) = self.rate_limited_posts.lock() {
            if let Some((remaining, reset_at)) = limited.get_mut(&id.to_string()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(MigrationError::RateLimited {
                        reset_at: *reset_at,
                    });
                }
            }
        }
        self.posts
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or_else(|| MigrationError::item_fetch(EntityKind::Post, id, "post not found"))
    }

    async fn list_comments(&self, post_id: &SourceId) -> Result<Vec<SourceComment>, MigrationError> {
        let key = post_id.to_string();
        if self.failing_comments.contains(&key) {
            return Err(MigrationError::item_fetch(
                EntityKind::Comment,
                post_id,
                "injected failure",
            ));
        }
        Ok(self.comments.get(&key).cloned().unwrap_or_default())
    }

    async fn list_keys(&self, page: u32, per_page: u32) -> Result<Vec<SourceKey>, MigrationError> {
        Ok(page_slice(&self.keys, page, per_page))
    }

    async fn list_stars(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<SourceSocialEdge>, MigrationError> {
        Ok(page_slice(&self.stars, page, per_page))
    }

    async fn count_posts(&self, owner: Option<&str>) -> Result<Option<u64>, MigrationError> {
        Ok(Some(self.owned_posts(owner).len() as u64))
    }

    async fn get_quota(&self) -> Result<Quota, MigrationError> {
        let mut queue = self
            .quotas
            .lock()
            .map_err(|_| MigrationError::Connection("quota state poisoned".into()))?;
        let quota = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(quota.unwrap_or_else(Quota::unlimited))
    }

    fn supports_comments(&self) -> bool {
        self.comments_supported
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixture() -> StaticSourceConnector {
        StaticSourceConnector::new(SourceKind::Github)
            .with_users(vec![SourceUser::new(1, "alice"), SourceUser::new(2, "bob")])
            .with_posts(vec![
                SourcePost::new("a", 1),
                SourcePost::new("b", 2),
                SourcePost::new("c", 1),
            ])
    }

    #[tokio::test]
    async fn test_pagination_ends_with_empty_page() {
        let source = fixture();
        assert_eq!(source.list_posts(None, 1, 2).await.unwrap().len(), 2);
        assert_eq!(source.list_posts(None, 2, 2).await.unwrap().len(), 1);
        assert!(source.list_posts(None, 3, 2).await.unwrap().is_empty());
        assert_eq!(source.page_fetches(), 3);
    }

    #[tokio::test]
    async fn test_owner_filter() {
        let source = fixture();
        let posts = source.list_posts(Some("alice"), 1, 10).await.unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(source.list_posts(Some("nobody"), 1, 10).await.unwrap().is_empty());
        assert_eq!(source.count_posts(Some("alice")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let source = fixture()
            .with_failing_post("b")
            .with_failing_comments("a")
            .with_validate_error(MigrationError::Connection("bad token".into()));

        assert!(source.validate().await.unwrap_err().is_fatal());
        let err = source.get_post_detail(&"b".into()).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(source.list_comments(&"a".into()).await.is_err());
        assert!(source.get_post_detail(&"a".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_sequence_repeats_last() {
        let reset_at = Utc::now();
        let source = fixture().with_quotas(vec![
            Quota { remaining: 5, reset_at },
            Quota { remaining: 50, reset_at },
        ]);
        assert_eq!(source.get_quota().await.unwrap().remaining, 5);
        assert_eq!(source.get_quota().await.unwrap().remaining, 50);
        assert_eq!(source.get_quota().await.unwrap().remaining, 50);
    }

    #[tokio::test]
    async fn test_default_quota_is_unlimited() {
        let source = StaticSourceConnector::new(SourceKind::Legacy);
        assert!(source.get_quota().await.unwrap().is_unlimited());
        assert!(!source.supports_comments());
    }

    #[tokio::test]
    async fn test_close_is_observable() {
        let source = fixture();
        assert!(!source.is_closed());
        source.close().await;
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_get_user_by_name_or_id() {
        let source = fixture();
        assert_eq!(source.get_user("bob").await.unwrap().id, SourceId::from(2));
        assert_eq!(source.get_user("1").await.unwrap().username, "alice");
        assert!(source.get_user("carol").await.is_err());
    }
}
