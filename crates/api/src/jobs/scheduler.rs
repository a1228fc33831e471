//! Periodic background jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often a job runs.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)] // Minutes and Hourly are for jobs with coarser schedules
pub enum JobFrequency {
    Seconds(u64),
    Minutes(u64),
    Hourly,
}

impl JobFrequency {
    /// Interval between executions. Never zero.
    pub fn duration(&self) -> Duration {
        match self {
            JobFrequency::Seconds(secs) => Duration::from_secs((*secs).max(1)),
            JobFrequency::Minutes(mins) => Duration::from_secs((*mins).max(1) * 60),
            JobFrequency::Hourly => Duration::from_secs(3600),
        }
    }
}

/// Trait for implementing background jobs.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging).
    fn name(&self) -> &'static str;

    fn frequency(&self) -> JobFrequency;

    /// Execute the job. Returns Ok(()) on success, Err with message on failure.
    async fn execute(&self) -> Result<(), String>;
}

/// Runs registered jobs on their intervals until shut down.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    /// Start all registered jobs.
    pub fn start(&mut self) {
        info!("Starting job scheduler with {} jobs", self.jobs.len());

        for job in &self.jobs {
            let job = Arc::clone(job);
            let shutdown = self.shutdown.child_token();

            let handle = tokio::spawn(async move {
                let name = job.name();
                let frequency = job.frequency();
                let mut interval = tokio::time::interval(frequency.duration());

                // Skip the first immediate tick
                interval.tick().await;

                info!(job = name, frequency = ?frequency, "Job scheduled");

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let start = std::time::Instant::now();

                            match job.execute().await {
                                Ok(()) => {
                                    info!(
                                        job = name,
                                        elapsed_ms = start.elapsed().as_millis(),
                                        "Job completed successfully"
                                    );
                                }
                                Err(e) => {
                                    error!(
                                        job = name,
                                        elapsed_ms = start.elapsed().as_millis(),
                                        error = %e,
                                        "Job failed"
                                    );
                                }
                            }
                        }
                        _ = shutdown.cancelled() => {
                            info!(job = name, "Job shutting down");
                            break;
                        }
                    }
                }
            });

            self.handles.push(handle);
        }
    }

    /// Signals every job to stop. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        self.shutdown.cancel();
    }

    /// Wait for all jobs to complete with timeout.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        let shutdown_future = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Job task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All jobs completed gracefully"),
            Err(_) => warn!("Job shutdown timed out after {:?}", timeout),
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
