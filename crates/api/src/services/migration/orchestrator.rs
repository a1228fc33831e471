//! Staged migration run.
//!
//! Stages run strictly in dependency order: users, keys, posts and their
//! files, comments, stars. Every read from the source is preceded by a
//! cancellation checkpoint; items already fetched in a page are still
//! written before the next checkpoint is reached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use domain::models::{
    EntityKind, JobStatus, MigrationResult, MigrationSettings, NewComment, NewSnippet,
    NewSnippetFile, NewUser, SourceFile, SourceId, SourceKind, SourcePost, SourceUser,
};
use domain::services::{
    github_rules, gitlab_rules, legacy_rules, ContentTransformer, EntityMapper, ProgressSink,
    SourceConnector, TargetStore, UrlTransformRule,
};
use domain::MigrationError;
use shared::password::{generate_credential, is_carryable_hash};

use crate::middleware::metrics::{record_item, ItemOutcome};
use crate::services::rate_limiter::QuotaGate;

/// Deployment-wide inputs to every run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Public base URL of the target; rewritten links point here.
    pub base_url: String,
    /// Remaining remote requests below which the run pauses.
    pub low_water_mark: u32,
}

/// What a finished run hands back to its owner.
#[derive(Debug)]
pub struct RunReport {
    pub status: JobStatus,
    pub result: MigrationResult,
    /// The error that stopped the run, when it failed.
    pub fatal: Option<MigrationError>,
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Report for a run that failed before any stage started.
    pub fn failed(err: MigrationError) -> Self {
        let mut result = MigrationResult::new();
        result.record_error(&err);
        Self {
            status: JobStatus::Failed,
            result,
            fatal: Some(err),
            warnings: Vec::new(),
        }
    }
}

/// Link rewrite rules for the run's source kind.
pub fn rules_for(
    settings: &MigrationSettings,
    base_url: &str,
) -> Result<Vec<UrlTransformRule>, MigrationError> {
    match settings.source_kind {
        SourceKind::Github => Ok(github_rules(base_url)),
        SourceKind::Gitlab => Ok(gitlab_rules(base_url)),
        SourceKind::Legacy => match settings.source_web_url.as_deref() {
            Some(web_url) => legacy_rules(web_url, base_url).map_err(|e| {
                MigrationError::InvalidSettings(format!("source_web_url: {}", e))
            }),
            None => Ok(Vec::new()),
        },
    }
}

pub struct Orchestrator {
    source: Arc<dyn SourceConnector>,
    store: Arc<dyn TargetStore>,
    progress: Arc<dyn ProgressSink>,
    gate: QuotaGate,
    cancel: CancellationToken,
    settings: MigrationSettings,
    mapper: EntityMapper,
    transformer: ContentTransformer,
    result: MigrationResult,
    /// Source IDs of posts created by this run, in creation order.
    imported_posts: Vec<SourceId>,
    warnings: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceConnector>,
        store: Arc<dyn TargetStore>,
        progress: Arc<dyn ProgressSink>,
        settings: MigrationSettings,
        engine: &EngineSettings,
        cancel: CancellationToken,
    ) -> Result<Self, MigrationError> {
        let rules = rules_for(&settings, &engine.base_url)?;
        let gate = QuotaGate::new(
            Arc::clone(&source),
            Arc::clone(&progress),
            cancel.clone(),
            engine.low_water_mark,
        )
        .with_request_delay(Duration::from_millis(settings.rate_limit_delay_ms));

        Ok(Self {
            source,
            store,
            progress,
            gate,
            cancel,
            settings,
            mapper: EntityMapper::new(),
            transformer: ContentTransformer::new(&engine.base_url, rules),
            result: MigrationResult::new(),
            imported_posts: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Runs every enabled stage and aggregates the outcome.
    ///
    /// Per-item failures are recorded and skipped; only a fatal error or a
    /// cancellation ends the run early. Whatever was written stays written.
    pub async fn execute(mut self) -> RunReport {
        let started = Instant::now();
        let outcome = self.run_stages().await;

        self.result.id_mapping = self.mapper.snapshot();
        self.result.elapsed_ms = started.elapsed().as_millis() as u64;

        let (status, fatal) = match outcome {
            Ok(()) => (JobStatus::Completed, None),
            Err(MigrationError::Cancelled) => {
                info!("Run stopped at cancellation checkpoint");
                (JobStatus::Cancelled, None)
            }
            Err(err) => {
                warn!(error = %err, "Run aborted");
                self.result.record_error(&err);
                (JobStatus::Failed, Some(err))
            }
        };

        info!(
            status = %status,
            users = self.result.counts.users,
            posts = self.result.counts.posts,
            files = self.result.counts.files,
            errors = self.result.error_count(),
            elapsed_ms = self.result.elapsed_ms,
            "Run finished"
        );

        RunReport {
            status,
            result: self.result,
            fatal,
            warnings: self.warnings,
        }
    }

    async fn run_stages(&mut self) -> Result<(), MigrationError> {
        self.migrate_users().await?;
        self.checkpoint()?;

        if self.settings.migrate_keys {
            self.migrate_keys().await?;
            self.checkpoint()?;
        }

        self.migrate_posts().await?;
        self.checkpoint()?;

        if self.settings.import_comments {
            self.import_comments().await?;
            self.checkpoint()?;
        }

        if self.settings.import_stars {
            self.migrate_stars().await?;
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), MigrationError> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Unwraps a listing. A non-fatal listing error ends the stage after
    /// being recorded; fatal errors and cancellation propagate.
    fn listing<T>(
        &mut self,
        stage: &str,
        fetched: Result<Vec<T>, MigrationError>,
    ) -> Result<Option<Vec<T>>, MigrationError> {
        match fetched {
            Ok(items) if items.is_empty() => Ok(None),
            Ok(items) => Ok(Some(items)),
            Err(err) if err.is_fatal() || matches!(err, MigrationError::Cancelled) => Err(err),
            Err(err) => {
                warn!(stage, error = %err, "Listing failed, ending stage");
                self.result.record_error(&err);
                Ok(None)
            }
        }
    }

    fn record_mapping(&mut self, kind: EntityKind, source_id: &SourceId, new_id: Uuid) {
        if let Err(e) = self.mapper.record(kind, source_id, new_id) {
            warn!(kind = %kind, source_id = %source_id, error = %e, "Mapping conflict");
            self.result
                .record_error(&MigrationError::item_persist(kind, source_id, e));
        }
    }

    fn fail_item(&mut self, err: MigrationError) {
        let kind = err.subject().map(|(kind, _)| kind);
        warn!(error = %err, "Item skipped");
        self.result.record_failure(&err);
        if let Some(kind) = kind {
            record_item(kind, ItemOutcome::Failed);
        }
    }

    fn imported(&mut self, kind: EntityKind) {
        self.result.counts.increment(kind);
        record_item(kind, ItemOutcome::Imported);
    }

    // Users

    async fn migrate_users(&mut self) -> Result<(), MigrationError> {
        info!(stage = "users", "Stage started");
        let source = Arc::clone(&self.source);
        let per_page = self.settings.batch_size;
        let mut page = 1;
        let mut seen = 0u64;

        loop {
            self.checkpoint()?;
            self.gate.before_fetch(seen, 0).await?;
            let fetched = self
                .gate
                .retry_rate_limited(seen, 0, || source.list_users(page, per_page))
                .await;
            let Some(users) = self.listing("users", fetched)? else {
                break;
            };

            for user in users {
                seen += 1;
                self.progress
                    .report(&format!("Migrating user {}", user.username), seen, 0)
                    .await;
                self.ensure_user(&user).await;
            }
            page += 1;
        }

        info!(stage = "users", count = self.result.counts.users, "Stage finished");
        Ok(())
    }

    /// Target ID for a source user, matching or creating the account on
    /// first sight. `None` when the account could not be written.
    async fn ensure_user(&mut self, user: &SourceUser) -> Option<Uuid> {
        if let Some(id) = self.mapper.lookup(EntityKind::User, &user.id) {
            return Some(id);
        }

        match self.match_or_create_user(user).await {
            Ok(id) => {
                self.record_mapping(EntityKind::User, &user.id, id);
                self.imported(EntityKind::User);
                Some(id)
            }
            Err(err) => {
                self.fail_item(err);
                None
            }
        }
    }

    async fn match_or_create_user(&mut self, user: &SourceUser) -> Result<Uuid, MigrationError> {
        let existing = self
            .store
            .find_user_by_username(&user.username)
            .await
            .map_err(|e| MigrationError::item_persist(EntityKind::User, &user.id, e))?;
        if let Some(existing) = existing {
            debug!(username = %user.username, "Matched existing account");
            return Ok(existing.id);
        }

        let (password_hash, plaintext) = if self.settings.reset_passwords {
            let credential = generate_credential()
                .map_err(|e| MigrationError::item_persist(EntityKind::User, &user.id, e))?;
            (Some(credential.hash), Some(credential.plaintext))
        } else {
            let carried = user
                .password_hash
                .clone()
                .filter(|hash| is_carryable_hash(hash));
            (carried, None)
        };

        let new_user = NewUser {
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            password_hash,
            created_at: self
                .settings
                .preserve_timestamps
                .then_some(user.created_at)
                .flatten(),
        };
        let id = self
            .store
            .create_user(new_user)
            .await
            .map_err(|e| MigrationError::item_persist(EntityKind::User, &user.id, e))?;

        if let Some(plaintext) = plaintext {
            self.result
                .generated_passwords
                .insert(user.username.clone(), plaintext);
        }
        Ok(id)
    }

    // Keys

    async fn migrate_keys(&mut self) -> Result<(), MigrationError> {
        info!(stage = "keys", "Stage started");
        let source = Arc::clone(&self.source);
        let per_page = self.settings.batch_size;
        let mut page = 1;
        let mut seen = 0u64;

        loop {
            self.checkpoint()?;
            self.gate.before_fetch(seen, 0).await?;
            let fetched = self
                .gate
                .retry_rate_limited(seen, 0, || source.list_keys(page, per_page))
                .await;
            let Some(keys) = self.listing("keys", fetched)? else {
                break;
            };

            for key in keys {
                seen += 1;
                if self.mapper.is_mapped(EntityKind::User, &key.owner_id) {
                    self.imported(EntityKind::Key);
                } else {
                    self.fail_item(MigrationError::missing_dependency(
                        EntityKind::Key,
                        &key.id,
                        EntityKind::User,
                        &key.owner_id,
                    ));
                }
            }
            self.progress.report("Counting keys", seen, 0).await;
            page += 1;
        }

        if self.result.counts.keys > 0 {
            self.warnings.push(format!(
                "{} SSH keys counted; key material is not transferred",
                self.result.counts.keys
            ));
        }
        info!(stage = "keys", count = self.result.counts.keys, "Stage finished");
        Ok(())
    }

    // Posts and files

    async fn migrate_posts(&mut self) -> Result<(), MigrationError> {
        info!(stage = "posts", "Stage started");
        let source = Arc::clone(&self.source);
        let owner = if self.source.kind().is_remote() {
            self.settings.username.clone()
        } else {
            None
        };

        let total = match self.source.count_posts(owner.as_deref()).await {
            Ok(Some(n)) => self
                .settings
                .max_items
                .map_or(n, |max| n.min(u64::from(max))),
            Ok(None) => 0,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!(error = %err, "Post count unavailable");
                0
            }
        };

        let per_page = self.settings.batch_size;
        let max_items = self.settings.max_items.map(u64::from);
        let mut page = 1;
        let mut processed = 0u64;

        'pages: loop {
            self.checkpoint()?;
            self.gate.before_fetch(processed, total).await?;
            let fetched = self
                .gate
                .retry_rate_limited(processed, total, || {
                    source.list_posts(owner.as_deref(), page, per_page)
                })
                .await;
            let Some(posts) = self.listing("posts", fetched)? else {
                break;
            };

            for post in posts {
                if post.private && !self.settings.migrate_private_items {
                    self.result.filtered_private += 1;
                    continue;
                }
                if max_items.is_some_and(|max| processed >= max) {
                    break 'pages;
                }
                processed += 1;
                self.progress
                    .report(&format!("Migrating post {}", post.id), processed, total)
                    .await;
                self.migrate_post(post, processed, total).await?;
            }
            page += 1;
        }

        if self.result.filtered_private > 0 {
            self.warnings.push(format!(
                "{} private posts excluded; enable migrate_private_items to include them",
                self.result.filtered_private
            ));
        }
        info!(
            stage = "posts",
            posts = self.result.counts.posts,
            files = self.result.counts.files,
            filtered_private = self.result.filtered_private,
            "Stage finished"
        );
        Ok(())
    }

    /// Writes one post and its files. Errors are returned only when the run
    /// must stop. `current` and `total` feed progress reports while a
    /// rate-limited detail fetch waits.
    async fn migrate_post(
        &mut self,
        post: SourcePost,
        current: u64,
        total: u64,
    ) -> Result<(), MigrationError> {
        let Some(owner_id) = self.mapper.lookup(EntityKind::User, &post.owner_id) else {
            self.fail_item(MigrationError::missing_dependency(
                EntityKind::Post,
                &post.id,
                EntityKind::User,
                &post.owner_id,
            ));
            return Ok(());
        };

        let post = if self.source.kind().is_remote() || !post.is_complete() {
            self.checkpoint()?;
            self.gate.pace().await?;
            let source = Arc::clone(&self.source);
            let detail = self
                .gate
                .retry_rate_limited(current, total, || source.get_post_detail(&post.id))
                .await;
            match detail {
                Ok(detail) => detail,
                Err(err) if err.is_fatal() || err == MigrationError::Cancelled => return Err(err),
                Err(err) => {
                    self.fail_item(err.for_item(EntityKind::Post, &post.id));
                    return Ok(());
                }
            }
        } else {
            post
        };

        let preserve = self.settings.preserve_timestamps;
        let title = post
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| post.files.first().map(|f| f.filename.clone()));
        let snippet = NewSnippet {
            owner_id,
            title,
            description: post
                .description
                .as_deref()
                .map(|d| self.transformer.transform(d)),
            private: post.private,
            source_url: post.html_url.clone(),
            created_at: preserve.then_some(post.created_at).flatten(),
            updated_at: preserve.then_some(post.updated_at).flatten(),
        };

        let snippet_id = match self.store.create_snippet(snippet).await {
            Ok(id) => id,
            Err(e) => {
                self.fail_item(MigrationError::item_persist(EntityKind::Post, &post.id, e));
                return Ok(());
            }
        };

        self.record_mapping(EntityKind::Post, &post.id, snippet_id);
        if let Some(url) = &post.html_url {
            self.transformer.record_post(url, snippet_id);
        }
        self.imported(EntityKind::Post);
        self.imported_posts.push(post.id.clone());

        for file in post.files {
            self.migrate_file(snippet_id, &post.id, file).await;
        }
        Ok(())
    }

    async fn migrate_file(&mut self, snippet_id: Uuid, post_id: &SourceId, file: SourceFile) {
        let file_id = format!("{}/{}", post_id, file.filename);
        let Some(content) = file.content else {
            self.fail_item(MigrationError::item_fetch(
                EntityKind::File,
                file_id,
                "content unavailable",
            ));
            return;
        };

        let new_file = NewSnippetFile::new(snippet_id, file.filename, content);
        match self.store.create_file(new_file).await {
            Ok(_) => self.imported(EntityKind::File),
            Err(e) => self.fail_item(MigrationError::item_persist(EntityKind::File, file_id, e)),
        }
    }

    // Comments

    async fn import_comments(&mut self) -> Result<(), MigrationError> {
        if !self.source.supports_comments() {
            self.warnings
                .push(format!("Comments are not available from {} sources", self.source.kind()));
            return Ok(());
        }

        info!(stage = "comments", "Stage started");
        let source = Arc::clone(&self.source);
        let posts = std::mem::take(&mut self.imported_posts);
        let total = posts.len() as u64;

        for (index, post_id) in posts.iter().enumerate() {
            self.checkpoint()?;
            self.gate.before_fetch(index as u64, total).await?;
            self.progress
                .report(
                    &format!("Importing comments for post {}", post_id),
                    index as u64 + 1,
                    total,
                )
                .await;

            let fetched = self
                .gate
                .retry_rate_limited(index as u64, total, || source.list_comments(post_id))
                .await;
            let comments = match fetched {
                Ok(comments) => comments,
                Err(err) if err.is_fatal() || err == MigrationError::Cancelled => return Err(err),
                Err(err) => {
                    self.fail_item(err.for_item(EntityKind::Comment, post_id));
                    continue;
                }
            };
            let Some(snippet_id) = self.mapper.lookup(EntityKind::Post, post_id) else {
                continue;
            };

            for comment in comments {
                let Some(author_id) = self.ensure_user(&comment.author).await else {
                    self.result.skip(EntityKind::Comment, &comment.id);
                    record_item(EntityKind::Comment, ItemOutcome::Skipped);
                    continue;
                };

                let new_comment = NewComment {
                    snippet_id,
                    author_id,
                    body: self.transformer.transform(&comment.body),
                    created_at: self
                        .settings
                        .preserve_timestamps
                        .then_some(comment.created_at)
                        .flatten(),
                };
                match self.store.create_comment(new_comment).await {
                    Ok(id) => {
                        self.record_mapping(EntityKind::Comment, &comment.id, id);
                        self.imported(EntityKind::Comment);
                    }
                    Err(e) => self.fail_item(MigrationError::item_persist(
                        EntityKind::Comment,
                        &comment.id,
                        e,
                    )),
                }
            }
        }

        self.imported_posts = posts;
        info!(stage = "comments", count = self.result.counts.comments, "Stage finished");
        Ok(())
    }

    // Stars

    async fn migrate_stars(&mut self) -> Result<(), MigrationError> {
        info!(stage = "stars", "Stage started");
        let source = Arc::clone(&self.source);
        let per_page = self.settings.batch_size;
        let mut page = 1;
        let mut seen = 0u64;

        loop {
            self.checkpoint()?;
            self.gate.before_fetch(seen, 0).await?;
            let fetched = self
                .gate
                .retry_rate_limited(seen, 0, || source.list_stars(page, per_page))
                .await;
            let Some(stars) = self.listing("stars", fetched)? else {
                break;
            };

            for star in stars {
                seen += 1;
                let edge_id = format!("{}->{}", star.user_id, star.post_id);
                let user = self.mapper.lookup(EntityKind::User, &star.user_id);
                let post = self.mapper.lookup(EntityKind::Post, &star.post_id);
                let (Some(user_id), Some(snippet_id)) = (user, post) else {
                    debug!(edge = %edge_id, "Star endpoint not migrated, ignoring");
                    record_item(EntityKind::SocialEdge, ItemOutcome::Skipped);
                    continue;
                };

                match self.store.create_star(user_id, snippet_id).await {
                    Ok(_) => self.imported(EntityKind::SocialEdge),
                    Err(e) => self.fail_item(MigrationError::item_persist(
                        EntityKind::SocialEdge,
                        edge_id,
                        e,
                    )),
                }
            }
            self.progress.report("Migrating stars", seen, 0).await;
            page += 1;
        }

        info!(stage = "stars", count = self.result.counts.stars, "Stage finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::models::{SourceComment, SourceKey, SourceSocialEdge};
    use domain::services::{NoopProgress, RecordingProgress, StaticSourceConnector};
    use persistence::InMemoryTargetStore;

    const BASE: &str = "https://snippets.example.com";

    fn engine() -> EngineSettings {
        EngineSettings {
            base_url: BASE.to_string(),
            low_water_mark: 10,
        }
    }

    fn legacy_settings() -> MigrationSettings {
        MigrationSettings::new(SourceKind::Legacy, "postgres://legacy/db")
    }

    fn post(id: i64, owner: i64, files: &[(&str, &str)]) -> SourcePost {
        let mut post = SourcePost::new(id, owner);
        post.files = files
            .iter()
            .map(|(name, content)| SourceFile::new(*name, *content))
            .collect();
        post
    }

    fn user_with_hash(id: i64, name: &str, hash: Option<&str>) -> SourceUser {
        let mut user = SourceUser::new(id, name);
        user.password_hash = hash.map(str::to_string);
        user
    }

    async fn run(
        source: StaticSourceConnector,
        store: Arc<InMemoryTargetStore>,
        settings: MigrationSettings,
    ) -> RunReport {
        Orchestrator::new(
            Arc::new(source),
            store,
            Arc::new(NoopProgress),
            settings,
            &engine(),
            CancellationToken::new(),
        )
        .unwrap()
        .execute()
        .await
    }

    #[tokio::test]
    async fn test_legacy_migration_end_to_end() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a"), SourceUser::new(2, "b")])
            .with_posts(vec![
                post(10, 1, &[("one.py", "print(1)")]),
                post(11, 1, &[("two.rs", "fn main() {}"), ("README.md", "# hi")]),
                post(12, 2, &[("three.txt", "three")]),
            ]);
        let store = Arc::new(InMemoryTargetStore::new());

        let report = run(source, store.clone(), legacy_settings()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.counts.users, 2);
        assert_eq!(report.result.counts.posts, 3);
        assert_eq!(report.result.counts.files, 4);
        assert_eq!(report.result.error_count(), 0);
        assert_eq!(store.snippets().await.len(), 3);
        assert_eq!(report.result.id_mapping[&EntityKind::Post].len(), 3);

        let owners: Vec<Uuid> = store.snippets().await.iter().map(|(_, s)| s.owner_id).collect();
        let user_ids: Vec<Uuid> = store.users().await.iter().map(|(id, _)| *id).collect();
        assert!(owners.iter().all(|o| user_ids.contains(o)));
    }

    #[tokio::test]
    async fn test_post_with_unmapped_owner_is_skipped() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![post(10, 1, &[("a.txt", "a")]), post(11, 99, &[("b.txt", "b")])]);
        let store = Arc::new(InMemoryTargetStore::new());

        let report = run(source, store.clone(), legacy_settings()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.counts.posts, 1);
        assert_eq!(report.result.skipped_ids(EntityKind::Post), ["11".to_string()]);
        assert_eq!(
            report.result.errors[0].kind,
            domain::ErrorKind::MissingDependency
        );
        assert_eq!(store.snippets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_user_does_not_stop_run() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "good"), SourceUser::new(2, "bad")])
            .with_posts(vec![post(10, 2, &[("x.txt", "x")]), post(11, 1, &[("y.txt", "y")])]);
        let store = Arc::new(InMemoryTargetStore::new().rejecting_username("bad"));

        let report = run(source, store.clone(), legacy_settings()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.counts.users, 1);
        assert_eq!(report.result.skipped_ids(EntityKind::User), ["2".to_string()]);
        assert_eq!(report.result.skipped_ids(EntityKind::Post), ["10".to_string()]);
        assert_eq!(report.result.counts.posts, 1);
    }

    #[tokio::test]
    async fn test_existing_username_is_matched_not_recreated() {
        let store = Arc::new(InMemoryTargetStore::new());
        let existing = store.seed_user("alice").await;
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "alice")])
            .with_posts(vec![post(10, 1, &[("a.txt", "a")])]);

        let report = run(source, store.clone(), legacy_settings()).await;

        assert_eq!(report.result.counts.users, 1);
        assert_eq!(store.users().await.len(), 1);
        assert_eq!(store.snippets().await[0].1.owner_id, existing);
    }

    #[tokio::test]
    async fn test_reset_passwords_keeps_plaintext_out_of_store() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![user_with_hash(1, "alice", Some("plain-legacy"))]);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.reset_passwords = true;

        let report = run(source, store.clone(), settings).await;

        let plaintext = report.result.generated_passwords.get("alice").unwrap().clone();
        let users = store.users().await;
        let stored = users[0].1.password_hash.clone().unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert_ne!(stored, plaintext);
        assert!(!stored.contains(&plaintext));
    }

    #[tokio::test]
    async fn test_only_recognised_hashes_are_carried() {
        let phc = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNo";
        let source = StaticSourceConnector::new(SourceKind::Legacy).with_users(vec![
            user_with_hash(1, "kept", Some(phc)),
            user_with_hash(2, "dropped", Some("5f4dcc3b5aa765d61d8327deb882cf99")),
        ]);
        let store = Arc::new(InMemoryTargetStore::new());

        let report = run(source, store.clone(), legacy_settings()).await;

        assert!(report.result.generated_passwords.is_empty());
        let users = store.users().await;
        let kept = users.iter().find(|(_, u)| u.username == "kept").unwrap();
        let dropped = users.iter().find(|(_, u)| u.username == "dropped").unwrap();
        assert_eq!(kept.1.password_hash.as_deref(), Some(phc));
        assert!(dropped.1.password_hash.is_none());
    }

    #[tokio::test]
    async fn test_private_filter_and_max_items() {
        let mut posts = Vec::new();
        for id in 0..10 {
            let mut p = post(id, 1, &[("f.txt", "x")]);
            p.private = id % 3 == 0;
            posts.push(p);
        }
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(posts);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.migrate_private_items = false;
        settings.max_items = Some(5);

        let report = run(source, store, settings).await;

        assert_eq!(report.result.counts.posts, 5);
        assert!(report.result.filtered_private >= 2);
        assert!(report.warnings.iter().any(|w| w.contains("private")));
    }

    #[tokio::test]
    async fn test_timestamps_preserved_only_when_requested() {
        let created = Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0).unwrap();
        let mut p = post(10, 1, &[("a.txt", "a")]);
        p.created_at = Some(created);
        let make_source = || {
            StaticSourceConnector::new(SourceKind::Legacy)
                .with_users(vec![SourceUser::new(1, "a")])
                .with_posts(vec![p.clone()])
        };

        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.preserve_timestamps = true;
        run(make_source(), store.clone(), settings).await;
        assert_eq!(store.snippets().await[0].1.created_at, Some(created));

        let store = Arc::new(InMemoryTargetStore::new());
        run(make_source(), store.clone(), legacy_settings()).await;
        assert!(store.snippets().await[0].1.created_at.is_none());
    }

    #[tokio::test]
    async fn test_descriptions_link_to_earlier_posts() {
        let mut first = post(10, 1, &[("a.txt", "a")]);
        first.html_url = Some("https://old.example.com/a/10".into());
        let mut second = post(11, 1, &[("b.txt", "b")]);
        second.description = Some("Follow-up to https://old.example.com/a/10".into());

        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![first, second]);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.source_web_url = Some("https://old.example.com".into());

        let report = run(source, store.clone(), settings).await;

        let first_id = report.result.id_mapping[&EntityKind::Post]["10"];
        let snippets = store.snippets().await;
        let description = snippets[1].1.description.clone().unwrap();
        assert_eq!(
            description,
            format!("Follow-up to {}/snippets/{}", BASE, first_id)
        );
    }

    #[tokio::test]
    async fn test_keys_counted_with_warning() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_keys(vec![
                SourceKey {
                    id: SourceId::Int(1),
                    owner_id: SourceId::Int(1),
                    title: Some("laptop".into()),
                    key: "ssh-ed25519 AAAA".into(),
                },
                SourceKey {
                    id: SourceId::Int(2),
                    owner_id: SourceId::Int(42),
                    title: None,
                    key: "ssh-rsa AAAA".into(),
                },
            ]);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.migrate_keys = true;

        let report = run(source, store, settings).await;

        assert_eq!(report.result.counts.keys, 1);
        assert_eq!(report.result.skipped_ids(EntityKind::Key), ["2".to_string()]);
        assert!(report.warnings.iter().any(|w| w.contains("key material")));
    }

    #[tokio::test]
    async fn test_remote_import_with_comments_and_stars() {
        let mut gist = post(1, 7, &[]);
        gist.id = SourceId::Str("abc".into());
        gist.files = vec![SourceFile::new("hello.rb", "puts 1")];
        let commenter = SourceUser::new(8, "bob");
        let source = StaticSourceConnector::new(SourceKind::Github)
            .with_users(vec![SourceUser::new(7, "alice")])
            .with_posts(vec![gist])
            .with_comments(
                "abc",
                vec![SourceComment {
                    id: SourceId::Int(100),
                    author: commenter,
                    body: "nice".into(),
                    created_at: None,
                }],
            )
            .with_stars(vec![
                SourceSocialEdge {
                    user_id: SourceId::Int(7),
                    post_id: SourceId::Str("abc".into()),
                },
                SourceSocialEdge {
                    user_id: SourceId::Int(7),
                    post_id: SourceId::Str("elsewhere".into()),
                },
            ]);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = MigrationSettings::new(SourceKind::Github, "https://api.github.com");
        settings.username = Some("alice".into());
        settings.auth_token = Some("token".into());
        settings.import_comments = true;
        settings.import_stars = true;

        let report = run(source, store.clone(), settings).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.counts.posts, 1);
        assert_eq!(report.result.counts.comments, 1);
        // bob is created on demand as comment author
        assert_eq!(report.result.counts.users, 2);
        assert_eq!(report.result.counts.stars, 1);
        // the star on a gist outside the run is neither skipped nor an error
        assert!(report.result.skipped_ids(EntityKind::SocialEdge).is_empty());
        assert_eq!(report.result.error_count(), 0);
        assert_eq!(store.comments().await.len(), 1);
        assert_eq!(store.star_count().await, 1);
    }

    fn github_settings() -> MigrationSettings {
        let mut settings = MigrationSettings::new(SourceKind::Github, "https://api.github.com");
        settings.username = Some("alice".into());
        settings.auth_token = Some("token".into());
        settings
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_detail_waits_and_retries() {
        let reset_at = Utc::now() + chrono::Duration::seconds(20);
        let source = StaticSourceConnector::new(SourceKind::Github)
            .with_users(vec![SourceUser::new(7, "alice")])
            .with_posts(vec![post(1, 7, &[("a.rb", "puts 1")]), post(2, 7, &[("b.rb", "puts 2")])])
            .with_rate_limited_post(1, 2, reset_at);
        let store = Arc::new(InMemoryTargetStore::new());

        let start = tokio::time::Instant::now();
        let report = run(source, store.clone(), github_settings()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.fatal.is_none());
        assert_eq!(report.result.counts.posts, 2);
        assert_eq!(report.result.error_count(), 0);
        assert!(start.elapsed() >= Duration::from_secs(19));
        assert_eq!(store.snippets().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_rate_limit_skips_only_that_post() {
        let reset_at = Utc::now() + chrono::Duration::seconds(5);
        let source = StaticSourceConnector::new(SourceKind::Github)
            .with_users(vec![SourceUser::new(7, "alice")])
            .with_posts(vec![post(1, 7, &[("a.rb", "puts 1")]), post(2, 7, &[("b.rb", "puts 2")])])
            .with_rate_limited_post(1, u32::MAX, reset_at);
        let store = Arc::new(InMemoryTargetStore::new());

        let report = run(source, store, github_settings()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.counts.posts, 1);
        assert_eq!(report.result.skipped_ids(EntityKind::Post), ["1".to_string()]);
        assert_eq!(report.result.errors[0].kind, domain::ErrorKind::ItemFetch);
    }

    #[tokio::test]
    async fn test_comment_fetch_failure_is_not_fatal() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![post(10, 1, &[("a.txt", "a")]), post(11, 1, &[("b.txt", "b")])])
            .with_comments_supported(true)
            .with_failing_comments(10);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.import_comments = true;

        let report = run(source, store, settings).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.result.error_count(), 1);
        assert_eq!(report.result.counts.posts, 2);
    }

    #[tokio::test]
    async fn test_unsupported_comments_warn() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")]);
        let store = Arc::new(InMemoryTargetStore::new());
        let mut settings = legacy_settings();
        settings.import_comments = true;

        let report = run(source, store, settings).await;

        assert!(report.warnings.iter().any(|w| w.contains("Comments")));
    }

    #[tokio::test]
    async fn test_failed_detail_fetch_skips_post() {
        let mut incomplete = post(10, 1, &[]);
        incomplete.files = vec![SourceFile {
            filename: "big.txt".into(),
            content: None,
            raw_url: None,
            size: None,
        }];
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![incomplete, post(11, 1, &[("ok.txt", "ok")])])
            .with_failing_post(10);
        let store = Arc::new(InMemoryTargetStore::new());

        let report = run(source, store, legacy_settings()).await;

        assert_eq!(report.result.counts.posts, 1);
        assert_eq!(report.result.skipped_ids(EntityKind::Post), ["10".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_writes_nothing() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![post(10, 1, &[("a.txt", "a")])]);
        let store = Arc::new(InMemoryTargetStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = Orchestrator::new(
            Arc::new(source),
            store.clone(),
            Arc::new(NoopProgress),
            legacy_settings(),
            &engine(),
            cancel,
        )
        .unwrap()
        .execute()
        .await;

        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(report.fatal.is_none());
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_progress_reports_posts() {
        let source = StaticSourceConnector::new(SourceKind::Legacy)
            .with_users(vec![SourceUser::new(1, "a")])
            .with_posts(vec![post(10, 1, &[("a.txt", "a")]), post(11, 1, &[("b.txt", "b")])]);
        let progress = Arc::new(RecordingProgress::new());

        Orchestrator::new(
            Arc::new(source),
            Arc::new(InMemoryTargetStore::new()),
            progress.clone(),
            legacy_settings(),
            &engine(),
            CancellationToken::new(),
        )
        .unwrap()
        .execute()
        .await;

        let events = progress.events();
        assert!(events.contains(&("Migrating post 11".to_string(), 2, 2)));
    }

    #[test]
    fn test_rules_for_legacy_without_web_url() {
        let rules = rules_for(&legacy_settings(), BASE).unwrap();
        assert!(rules.is_empty());
        let mut settings = MigrationSettings::new(SourceKind::Gitlab, "https://gitlab.com");
        settings.username = Some("a".into());
        assert!(!rules_for(&settings, BASE).unwrap().is_empty());
    }
}
