//! Process-wide table of migration jobs.
//!
//! The outer map lock is only held long enough to find or insert an entry;
//! each entry carries its own reader/writer lock so status reads of one job
//! never wait on writes to another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use domain::models::{JobStatus, MigrationJob, MigrationResult, MigrationSettings};
use domain::services::ProgressSink;
use domain::MigrationError;

/// Label shown on a job cancelled through the control surface.
pub const CANCELLED_OPERATION: &str = "Cancelled by user";

struct JobEntry {
    job: RwLock<MigrationJob>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Returned by `create_job`: what the owning task needs to run the job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
    pub cancel: CancellationToken,
}

/// Result of a cancel request on an existing job.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(MigrationJob),
    /// The job had already reached a terminal state; nothing changed.
    AlreadyFinished(MigrationJob),
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job in `starting` state.
    pub async fn create_job(&self, settings: &MigrationSettings) -> JobHandle {
        let job = MigrationJob::new(settings);
        let id = job.id;
        let cancel = CancellationToken::new();
        let entry = Arc::new(JobEntry {
            job: RwLock::new(job),
            cancel: cancel.clone(),
            task: Mutex::new(None),
        });
        self.jobs.write().await.insert(id, entry);
        JobHandle { id, cancel }
    }

    async fn entry(&self, id: Uuid) -> Result<Arc<JobEntry>, MigrationError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MigrationError::JobNotFound(id))
    }

    /// Attaches the background task running the job.
    pub async fn attach_task(&self, id: Uuid, task: JoinHandle<()>) -> Result<(), MigrationError> {
        let entry = self.entry(id).await?;
        *entry.task.lock().await = Some(task);
        Ok(())
    }

    /// Takes the task handle so a caller can await completion. Only the
    /// first caller gets it.
    pub async fn take_task(&self, id: Uuid) -> Result<Option<JoinHandle<()>>, MigrationError> {
        let entry = self.entry(id).await?;
        let task = entry.task.lock().await.take();
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<MigrationJob, MigrationError> {
        let entry = self.entry(id).await?;
        let mut job = entry.job.read().await.clone();
        job.touch();
        Ok(job)
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> Vec<MigrationJob> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut job = entry.job.read().await.clone();
            job.touch();
            jobs.push(job);
        }
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// Moves a `starting` job to `running`. Returns false otherwise.
    pub async fn mark_running(&self, id: Uuid) -> Result<bool, MigrationError> {
        let entry = self.entry(id).await?;
        let mut job = entry.job.write().await;
        if job.status != JobStatus::Starting {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.current_operation = "Running".to_string();
        job.touch();
        Ok(true)
    }

    /// Records progress from the owning task.
    ///
    /// Ignored once the job is terminal, so a task still winding down after a
    /// cancel cannot overwrite the cancelled label.
    pub async fn update_progress(
        &self,
        id: Uuid,
        message: &str,
        current: u64,
        total: u64,
    ) -> Result<bool, MigrationError> {
        let entry = self.entry(id).await?;
        let mut job = entry.job.write().await;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.current_operation = message.to_string();
        job.processed_items = current;
        job.total_items = total;
        job.touch();
        Ok(true)
    }

    /// Cancels a `starting` or `running` job and signals its task.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, MigrationError> {
        let entry = self.entry(id).await?;
        let mut job = entry.job.write().await;
        if !job.status.can_cancel() {
            return Ok(CancelOutcome::AlreadyFinished(job.clone()));
        }
        job.finish(JobStatus::Cancelled, CANCELLED_OPERATION);
        entry.cancel.cancel();
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(CancelOutcome::Cancelled(job.clone()))
    }

    /// Stores the final result and terminal status.
    ///
    /// A job cancelled in the meantime stays `cancelled` and keeps its end
    /// time; the partial result is still attached.
    pub async fn finalize(
        &self,
        id: Uuid,
        status: JobStatus,
        result: MigrationResult,
        fatal: Option<&MigrationError>,
    ) -> Result<MigrationJob, MigrationError> {
        let entry = self.entry(id).await?;
        let mut job = entry.job.write().await;

        job.imported_items = result.counts.total();
        job.error_count = result.error_count();
        job.errors = result.errors.iter().map(|e| e.message.clone()).collect();

        if job.status == JobStatus::Cancelled {
            job.touch();
        } else {
            let operation = match (status, fatal) {
                (JobStatus::Failed, Some(err)) => format!("Failed: {}", err),
                (JobStatus::Completed, _) => "Completed".to_string(),
                _ => status.as_str().to_string(),
            };
            job.finish(status, operation);
        }

        job.result = Some(result);
        Ok(job.clone())
    }

    /// Drops terminal jobs that ended more than `older_than` ago.
    pub async fn evict_finished(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };

        let entries: Vec<(Uuid, Arc<JobEntry>)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let mut expired = Vec::new();
        for (id, entry) in entries {
            let job = entry.job.read().await;
            if job.status.is_terminal() && job.ended_at.map_or(false, |ended| ended <= cutoff) {
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().await;
        for id in &expired {
            jobs.remove(id);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// Forwards orchestrator progress into one registry entry.
pub struct RegistryProgress {
    registry: Arc<JobRegistry>,
    job_id: Uuid,
}

impl RegistryProgress {
    pub fn new(registry: Arc<JobRegistry>, job_id: Uuid) -> Self {
        Self { registry, job_id }
    }
}

#[async_trait::async_trait]
impl ProgressSink for RegistryProgress {
    async fn report(&self, message: &str, current: u64, total: u64) {
        if let Err(e) = self
            .registry
            .update_progress(self.job_id, message, current, total)
            .await
        {
            tracing::debug!(job_id = %self.job_id, error = %e, "Progress for unknown job dropped");
        }
    }
}
