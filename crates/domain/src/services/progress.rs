//! Progress reporting capability injected into the orchestrator.

use std::sync::Mutex;

#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    /// Reports the current operation and the running count within the stage.
    /// `total` is zero when the stage size is not known up front.
    async fn report(&self, message: &str, current: u64, total: u64);
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait::async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _message: &str, _current: u64, _total: u64) {}
}

/// Keeps every report in memory, for tests and dry-run diagnostics.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, u64, u64)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, u64, u64)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|(m, _, _)| m).collect()
    }
}

#[async_trait::async_trait]
impl ProgressSink for RecordingProgress {
    async fn report(&self, message: &str, current: u64, total: u64) {
        if let Ok(mut events) = self.events.lock() {
            events.push((message.to_string(), current, total));
        }
    }
}
