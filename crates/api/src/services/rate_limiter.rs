//! Quota-aware pacing of remote source reads.
//!
//! Before each paginated fetch the gate asks the source for its remaining
//! request budget. Below the low-water mark the calling task sleeps until the
//! window resets. A request the source rejects as rate limited is retried
//! after the same kind of wait. An optional fixed delay between requests is
//! enforced with a governor limiter.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota as GovQuota, RateLimiter,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use domain::models::Quota;
use domain::services::{ProgressSink, SourceConnector};
use domain::MigrationError;

use crate::middleware::metrics::record_rate_limit_wait;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Waits granted to one rate-limited request before it counts as failed.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Floor for a rejection whose reset time already passed.
const MIN_RETRY_WAIT: Duration = Duration::from_secs(1);

/// How long to wait for `quota` under `low_water_mark`. `None` means go ahead.
pub fn wait_for(quota: &Quota, low_water_mark: u32, now: DateTime<Utc>) -> Option<Duration> {
    if quota.is_unlimited() || quota.remaining >= low_water_mark {
        return None;
    }
    Some((quota.reset_at - now).to_std().unwrap_or(Duration::ZERO))
}

pub struct QuotaGate {
    source: Arc<dyn SourceConnector>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    low_water_mark: u32,
    pacer: Option<DirectLimiter>,
}

impl QuotaGate {
    pub fn new(
        source: Arc<dyn SourceConnector>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
        low_water_mark: u32,
    ) -> Self {
        Self {
            source,
            progress,
            cancel,
            low_water_mark,
            pacer: None,
        }
    }

    /// Allows at most one request per `delay`. A zero delay disables pacing.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.pacer = GovQuota::with_period(delay)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        self
    }

    /// Waits out the fixed inter-request delay only. Used before per-item
    /// fetches, which do not re-check the quota.
    pub async fn pace(&self) -> Result<(), MigrationError> {
        if let Some(pacer) = &self.pacer {
            tokio::select! {
                _ = pacer.until_ready() => {}
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
            }
        }
        Ok(())
    }

    /// Blocks until the next fetch may go out.
    ///
    /// `current` and `total` are passed through to the progress report while
    /// waiting. Cancellation interrupts the wait.
    pub async fn before_fetch(&self, current: u64, total: u64) -> Result<(), MigrationError> {
        self.pace().await?;

        if !self.source.kind().is_remote() {
            return Ok(());
        }

        let quota = match self.source.get_quota().await {
            Ok(quota) => quota,
            Err(MigrationError::RateLimited { reset_at }) => {
                return self.wait_until(reset_at, current, total).await;
            }
            Err(err) => return Err(err),
        };
        let Some(wait) = wait_for(&quota, self.low_water_mark, Utc::now()) else {
            return Ok(());
        };

        warn!(
            remaining = quota.remaining,
            low_water_mark = self.low_water_mark,
            wait_secs = wait.as_secs_f64(),
            "Rate limit low, waiting for reset"
        );
        self.sleep(wait, current, total).await
    }

    /// Sleeps until `reset_at`, at least `MIN_RETRY_WAIT`. Used after the
    /// source rejected a request for exceeding its quota.
    pub async fn wait_until(
        &self,
        reset_at: DateTime<Utc>,
        current: u64,
        total: u64,
    ) -> Result<(), MigrationError> {
        let wait = (reset_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(MIN_RETRY_WAIT);
        warn!(
            reset_at = %reset_at,
            wait_secs = wait.as_secs_f64(),
            "Rate limit exceeded, waiting for reset"
        );
        self.sleep(wait, current, total).await
    }

    /// Runs `fetch`, waiting out and retrying rate-limit rejections.
    ///
    /// After `MAX_RATE_LIMIT_RETRIES` waits the rejection is returned to the
    /// caller. Other results pass through untouched.
    pub async fn retry_rate_limited<T, F, Fut>(
        &self,
        current: u64,
        total: u64,
        mut fetch: F,
    ) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut attempts = 0;
        loop {
            match fetch().await {
                Err(MigrationError::RateLimited { reset_at })
                    if attempts < MAX_RATE_LIMIT_RETRIES =>
                {
                    attempts += 1;
                    self.wait_until(reset_at, current, total).await?;
                }
                other => return other,
            }
        }
    }

    async fn sleep(&self, wait: Duration, current: u64, total: u64) -> Result<(), MigrationError> {
        self.progress
            .report(
                &format!("Rate limit low, waiting {}s", wait.as_secs().max(1)),
                current,
                total,
            )
            .await;

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
        }

        let secs = wait.as_secs_f64();
        record_rate_limit_wait(secs);
        info!(wait_secs = secs, "Rate limit window reset, resuming");
        Ok(())
    }
}
