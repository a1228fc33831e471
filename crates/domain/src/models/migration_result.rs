//! Result aggregation for a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::migration_job::{JobKind, JobStatus};
use crate::error::{ErrorKind, MigrationError};

/// Kinds of entity moved by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Key,
    Post,
    File,
    Comment,
    SocialEdge,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Key => "key",
            EntityKind::Post => "post",
            EntityKind::File => "file",
            EntityKind::Comment => "comment",
            EntityKind::SocialEdge => "social_edge",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-kind counts of entities handled by a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCounts {
    /// Users created or matched to an existing account.
    pub users: u64,
    pub keys: u64,
    pub posts: u64,
    pub files: u64,
    pub comments: u64,
    pub stars: u64,
}

impl MigrationCounts {
    pub fn increment(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::User => self.users += 1,
            EntityKind::Key => self.keys += 1,
            EntityKind::Post => self.posts += 1,
            EntityKind::File => self.files += 1,
            EntityKind::Comment => self.comments += 1,
            EntityKind::SocialEdge => self.stars += 1,
        }
    }

    pub fn get(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::User => self.users,
            EntityKind::Key => self.keys,
            EntityKind::Post => self.posts,
            EntityKind::File => self.files,
            EntityKind::Comment => self.comments,
            EntityKind::SocialEdge => self.stars,
        }
    }

    pub fn total(&self) -> u64 {
        self.users + self.keys + self.posts + self.files + self.comments + self.stars
    }
}

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationErrorRecord {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub message: String,
}

impl From<&MigrationError> for MigrationErrorRecord {
    fn from(err: &MigrationError) -> Self {
        let (entity, source_id) = match err.subject() {
            Some((kind, id)) => (Some(kind), Some(id.to_string())),
            None => (None, None),
        };
        Self {
            kind: err.kind(),
            entity,
            source_id,
            message: err.to_string(),
        }
    }
}

/// Aggregated outcome of a migration or import run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub counts: MigrationCounts,
    pub errors: Vec<MigrationErrorRecord>,
    pub skipped: BTreeMap<EntityKind, Vec<String>>,
    /// Private posts left out because `migrate_private_items` was off.
    pub filtered_private: u64,
    pub id_mapping: BTreeMap<EntityKind, BTreeMap<String, Uuid>>,
    pub elapsed_ms: u64,
    /// Username to freshly generated password. Transient: only ever returned
    /// to the caller that owns the job, never persisted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub generated_passwords: BTreeMap<String, String>,
}

impl MigrationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a recoverable error and marks its subject as skipped.
    pub fn record_failure(&mut self, err: &MigrationError) {
        if let Some((kind, id)) = err.subject() {
            self.skip(kind, id);
        }
        self.errors.push(MigrationErrorRecord::from(err));
    }

    /// Records an error without touching the skipped lists.
    pub fn record_error(&mut self, err: &MigrationError) {
        self.errors.push(MigrationErrorRecord::from(err));
    }

    pub fn skip(&mut self, kind: EntityKind, source_id: impl ToString) {
        self.skipped
            .entry(kind)
            .or_default()
            .push(source_id.to_string());
    }

    pub fn skipped_ids(&self, kind: EntityKind) -> &[String] {
        self.skipped.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().map(|ids| ids.len() as u64).sum()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.len() as u64
    }

    /// Copy safe to persist or log: generated passwords removed.
    pub fn without_secrets(&self) -> Self {
        let mut copy = self.clone();
        copy.generated_passwords.clear();
        copy
    }
}

/// Projected counts reported by a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunSummary {
    pub users: u64,
    pub posts: u64,
    pub files: u64,
    pub keys: u64,
    pub comments: u64,
    pub stars: u64,
    pub skipped: u64,
    pub warnings: Vec<String>,
}

impl DryRunSummary {
    pub fn from_result(result: &MigrationResult, warnings: Vec<String>) -> Self {
        Self {
            users: result.counts.users,
            posts: result.counts.posts,
            files: result.counts.files,
            keys: result.counts.keys,
            comments: result.counts.comments,
            stars: result.counts.stars,
            skipped: result.skipped_total(),
            warnings,
        }
    }
}

/// Durable record written once a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub source_url: String,
    pub items_total: i64,
    pub items_imported: i64,
    pub error_count: i64,
    pub settings: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Post.to_string(), "post");
        assert_eq!(EntityKind::SocialEdge.to_string(), "social_edge");
        assert_eq!(
            serde_json::to_string(&EntityKind::SocialEdge).unwrap(),
            "\"social_edge\""
        );
    }

    #[test]
    fn test_counts_increment() {
        let mut counts = MigrationCounts::default();
        counts.increment(EntityKind::Post);
        counts.increment(EntityKind::Post);
        counts.increment(EntityKind::SocialEdge);
        assert_eq!(counts.posts, 2);
        assert_eq!(counts.get(EntityKind::SocialEdge), 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_record_failure_skips_subject() {
        let mut result = MigrationResult::new();
        let err = MigrationError::missing_dependency(EntityKind::Post, "abc", EntityKind::User, 9);
        result.record_failure(&err);

        assert_eq!(result.error_count(), 1);
        assert_eq!(result.skipped_ids(EntityKind::Post), ["abc".to_string()]);
        assert_eq!(result.errors[0].kind, ErrorKind::MissingDependency);
        assert_eq!(result.errors[0].entity, Some(EntityKind::Post));
        assert!(result.skipped_ids(EntityKind::User).is_empty());
    }

    #[test]
    fn test_fatal_error_not_skipped() {
        let mut result = MigrationResult::new();
        result.record_failure(&MigrationError::Connection("refused".into()));
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.skipped_total(), 0);
    }

    #[test]
    fn test_generated_passwords_omitted_when_empty() {
        let result = MigrationResult::new();
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("generated_passwords"));
    }

    #[test]
    fn test_without_secrets() {
        let mut result = MigrationResult::new();
        result
            .generated_passwords
            .insert("alice".into(), "s3cret-pass".into());
        let clean = result.without_secrets();
        assert!(clean.generated_passwords.is_empty());
        assert!(!serde_json::to_string(&clean).unwrap().contains("s3cret-pass"));
    }

    #[test]
    fn test_id_mapping_serialises_with_string_keys() {
        let mut result = MigrationResult::new();
        let id = Uuid::new_v4();
        result
            .id_mapping
            .entry(EntityKind::User)
            .or_default()
            .insert("1".into(), id);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["id_mapping"]["user"]["1"], id.to_string());
    }

    #[test]
    fn test_dry_run_summary_from_result() {
        let mut result = MigrationResult::new();
        result.counts.posts = 7;
        result.counts.files = 9;
        result.skip(EntityKind::Post, "x");
        let summary = DryRunSummary::from_result(&result, vec!["w".into()]);
        assert_eq!(summary.posts, 7);
        assert_eq!(summary.files, 9);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warnings, vec!["w".to_string()]);
    }
}
