//! Live job descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::migration_result::MigrationResult;
use super::settings::{MigrationSettings, SourceKind};

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full migration of a legacy instance.
    LegacyMigration,
    /// Import of one account from a hosted service.
    RemoteImport,
}

impl JobKind {
    pub fn for_source(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Legacy => JobKind::LegacyMigration,
            SourceKind::Github | SourceKind::Gitlab => JobKind::RemoteImport,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LegacyMigration => "legacy_migration",
            JobKind::RemoteImport => "remote_import",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy_migration" => Ok(JobKind::LegacyMigration),
            "remote_import" => Ok(JobKind::RemoteImport),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job state machine: `starting -> running -> {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(JobStatus::Starting),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a job reads from. Secrets are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub url: String,
    pub username: Option<String>,
}

impl From<&MigrationSettings> for SourceDescriptor {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            kind: settings.source_kind,
            url: super::settings::redact_url_password(&settings.source_url),
            username: settings.username.clone(),
        }
    }
}

/// Descriptor of one migration or import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub source: SourceDescriptor,
    pub total_items: u64,
    pub processed_items: u64,
    pub imported_items: u64,
    pub error_count: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_operation: String,
    pub settings: serde_json::Value,
    pub elapsed_ms: u64,
    /// Final result, attached once the job reaches a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MigrationResult>,
}

impl MigrationJob {
    pub fn new(settings: &MigrationSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: JobKind::for_source(settings.source_kind),
            status: JobStatus::Starting,
            source: SourceDescriptor::from(settings),
            total_items: 0,
            processed_items: 0,
            imported_items: 0,
            error_count: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            current_operation: "Starting".to_string(),
            settings: settings.snapshot(),
            elapsed_ms: 0,
            result: None,
        }
    }

    /// Recomputes `elapsed_ms` against `ended_at` or now.
    pub fn touch(&mut self) {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        self.elapsed_ms = (end - self.started_at).num_milliseconds().max(0) as u64;
    }

    /// Moves the job into a terminal state, stamping the end time.
    pub fn finish(&mut self, status: JobStatus, operation: impl Into<String>) {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.current_operation = operation.into();
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MigrationSettings {
        let mut settings = MigrationSettings::new(SourceKind::Github, "https://api.github.com");
        settings.username = Some("alice".into());
        settings.auth_token = Some("token".into());
        settings
    }

    #[test]
    fn test_new_job_starts() {
        let job = MigrationJob::new(&settings());
        assert_eq!(job.status, JobStatus::Starting);
        assert_eq!(job.kind, JobKind::RemoteImport);
        assert!(job.ended_at.is_none());
        assert_eq!(job.source.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_status_classification() {
        assert!(JobStatus::Starting.can_cancel());
        assert!(JobStatus::Running.can_cancel());
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.can_cancel());
        }
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            JobStatus::Starting,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_finish_stamps_end_time() {
        let mut job = MigrationJob::new(&settings());
        job.finish(JobStatus::Completed, "Done");
        assert!(job.ended_at.is_some());
        assert_eq!(job.current_operation, "Done");
        assert!(job.ended_at.unwrap() >= job.started_at);
    }

    #[test]
    fn test_job_serialisation_has_no_token() {
        let job = MigrationJob::new(&settings());
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("\"token\""));
        assert!(json.contains("\"status\":\"starting\""));
        assert!(json.contains("\"kind\":\"remote_import\""));
    }

    #[test]
    fn test_legacy_job_kind() {
        let settings = MigrationSettings::new(SourceKind::Legacy, "postgres://u:pw@db/legacy");
        let job = MigrationJob::new(&settings);
        assert_eq!(job.kind, JobKind::LegacyMigration);
        assert_eq!(job.source.url, "postgres://u:***@db/legacy");
    }
}
