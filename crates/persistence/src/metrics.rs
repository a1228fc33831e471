//! Target-store query metrics.

use metrics::histogram;
use std::time::Instant;

/// Record a query duration under `database_query_duration_seconds`.
pub fn record_query_duration(query_name: &str, outcome: &'static str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string(),
        "outcome" => outcome
    )
    .record(duration_secs);
}

/// Times one repository query.
///
/// Usage:
/// ```ignore
/// let timer = QueryTimer::new("find_user_by_username");
/// let result = sqlx::query_as::<_, UserEntity>(...).fetch_optional(&pool).await;
/// timer.finish(result)
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    /// Records the elapsed time labelled with the result's outcome and hands
    /// the result back.
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        record_query_duration(self.query_name, outcome, self.start.elapsed().as_secs_f64());
        result
    }
}
