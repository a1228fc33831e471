//! Drops finished jobs from the in-memory registry.
//!
//! Their summaries stay available through the history endpoint.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::services::JobRegistry;

use super::scheduler::{Job, JobFrequency};

pub struct RegistryEvictionJob {
    registry: Arc<JobRegistry>,
    retention: Duration,
    interval_secs: u64,
}

impl RegistryEvictionJob {
    /// Evicts jobs that ended more than `retention` ago, checking every
    /// `interval_secs`.
    pub fn new(registry: Arc<JobRegistry>, retention: Duration, interval_secs: u64) -> Self {
        Self {
            registry,
            retention,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for RegistryEvictionJob {
    fn name(&self) -> &'static str {
        "registry_eviction"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let evicted = self.registry.evict_finished(self.retention).await;
        if evicted > 0 {
            info!(
                evicted = evicted,
                retention_secs = self.retention.as_secs(),
                "Evicted finished jobs"
            );
        } else {
            debug!("No finished jobs to evict");
        }
        Ok(())
    }
}
