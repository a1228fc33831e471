//! Job control for migrations and imports.
//!
//! Starting a job registers it and hands the run to a background task; the
//! caller gets the descriptor back immediately. Dry runs execute inline
//! against a store that discards writes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use domain::models::{DryRunSummary, MigrationJob, MigrationSettings, MigrationSummary};
use domain::services::{NoopProgress, ProgressSink, StoreError, TargetStore};
use domain::MigrationError;

use crate::middleware::metrics::record_job_finished;
use crate::services::job_registry::{CancelOutcome, JobHandle, JobRegistry, RegistryProgress};
use crate::services::migration::{DryRunStore, EngineSettings, Orchestrator, RunReport};
use crate::services::sources::ConnectorFactory;

/// Durable summary of a finished job.
pub fn summary_for(job: &MigrationJob) -> MigrationSummary {
    let (total, imported) = match &job.result {
        Some(result) => (
            result.counts.total() + result.skipped_total(),
            result.counts.total(),
        ),
        None => (job.total_items, job.imported_items),
    };
    let as_i64 = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);

    MigrationSummary {
        job_id: job.id,
        kind: job.kind,
        status: job.status,
        source_url: job.source.url.clone(),
        items_total: as_i64(total),
        items_imported: as_i64(imported),
        error_count: as_i64(job.error_count),
        settings: job.settings.clone(),
        started_at: job.started_at,
        completed_at: job.ended_at,
    }
}

fn check_settings(settings: &MigrationSettings) -> Result<(), MigrationError> {
    settings
        .validate()
        .map_err(|e| MigrationError::InvalidSettings(e.to_string()))
}

pub struct MigrationService {
    registry: Arc<JobRegistry>,
    store: Arc<dyn TargetStore>,
    connectors: Arc<dyn ConnectorFactory>,
    engine: EngineSettings,
}

impl MigrationService {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn TargetStore>,
        connectors: Arc<dyn ConnectorFactory>,
        engine: EngineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            connectors,
            engine,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    /// Registers a job and starts it in the background.
    pub async fn start(&self, settings: MigrationSettings) -> Result<MigrationJob, MigrationError> {
        check_settings(&settings)?;

        let handle = self.registry.create_job(&settings).await;
        let job_id = handle.id;
        let span = info_span!(
            "migration_job",
            job_id = %job_id,
            kind = %settings.source_kind
        );

        let task = tokio::spawn(
            run_job(
                Arc::clone(&self.registry),
                Arc::clone(&self.store),
                Arc::clone(&self.connectors),
                self.engine.clone(),
                settings,
                handle,
            )
            .instrument(span),
        );
        self.registry.attach_task(job_id, task).await?;

        info!(job_id = %job_id, "Migration job started");
        self.registry.get(job_id).await
    }

    /// Runs every stage without writing to the target.
    ///
    /// Source failures surface as errors; item-level problems are reflected
    /// in the skipped count and warnings.
    pub async fn dry_run(&self, settings: MigrationSettings) -> Result<DryRunSummary, MigrationError> {
        check_settings(&settings)?;

        let source = self.connectors.connect(&settings).await?;
        if let Err(err) = source.validate().await {
            source.close().await;
            return Err(err);
        }

        let store: Arc<dyn TargetStore> = Arc::new(DryRunStore::new(Arc::clone(&self.store)));
        let progress: Arc<dyn ProgressSink> = Arc::new(NoopProgress);
        let report = match Orchestrator::new(
            Arc::clone(&source),
            store,
            progress,
            settings,
            &self.engine,
            CancellationToken::new(),
        ) {
            Ok(orchestrator) => orchestrator.execute().instrument(info_span!("dry_run")).await,
            Err(err) => RunReport::failed(err),
        };
        source.close().await;

        match report.fatal {
            Some(err) => Err(err),
            None => Ok(DryRunSummary::from_result(&report.result, report.warnings)),
        }
    }

    /// Current descriptor, including the final result and any generated
    /// passwords once the job has finished.
    pub async fn status(&self, id: Uuid) -> Result<MigrationJob, MigrationError> {
        self.registry.get(id).await
    }

    /// All live jobs, newest first. Generated passwords are left out.
    pub async fn list(&self) -> Vec<MigrationJob> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|mut job| {
                job.result = job.result.map(|r| r.without_secrets());
                job
            })
            .collect()
    }

    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, MigrationError> {
        self.registry.cancel(id).await
    }

    pub async fn history(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MigrationSummary>, StoreError> {
        self.store.list_summaries(page, per_page).await
    }

    /// Waits for the job's task to finish and returns the final descriptor.
    pub async fn wait(&self, id: Uuid) -> Result<MigrationJob, MigrationError> {
        if let Some(task) = self.registry.take_task(id).await? {
            if let Err(e) = task.await {
                error!(job_id = %id, error = %e, "Migration task panicked");
            }
        }
        self.registry.get(id).await
    }
}

async fn run_job(
    registry: Arc<JobRegistry>,
    store: Arc<dyn TargetStore>,
    connectors: Arc<dyn ConnectorFactory>,
    engine: EngineSettings,
    settings: MigrationSettings,
    handle: JobHandle,
) {
    let job_id = handle.id;
    if let Err(e) = registry.mark_running(job_id).await {
        warn!(error = %e, "Job vanished before it started");
        return;
    }
    let progress: Arc<dyn ProgressSink> =
        Arc::new(RegistryProgress::new(Arc::clone(&registry), job_id));
    progress.report("Connecting to source", 0, 0).await;

    let report = match connectors.connect(&settings).await {
        Ok(source) => {
            let report = match source.validate().await {
                Ok(()) => match Orchestrator::new(
                    Arc::clone(&source),
                    Arc::clone(&store),
                    progress,
                    settings,
                    &engine,
                    handle.cancel.clone(),
                ) {
                    Ok(orchestrator) => orchestrator.execute().await,
                    Err(err) => RunReport::failed(err),
                },
                Err(err) => RunReport::failed(err),
            };
            source.close().await;
            report
        }
        Err(err) => RunReport::failed(err),
    };

    if let Some(err) = &report.fatal {
        error!(error = %err, "Migration job failed");
    }

    let job = match registry
        .finalize(job_id, report.status, report.result, report.fatal.as_ref())
        .await
    {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "Job evicted before it finished");
            return;
        }
    };
    record_job_finished(job.status);

    if let Err(e) = store.save_summary(&summary_for(&job)).await {
        warn!(error = %e, "Failed to persist job summary");
    }
    info!(
        status = %job.status,
        imported = job.imported_items,
        errors = job.error_count,
        elapsed_ms = job.elapsed_ms,
        "Migration job finished"
    );
}
