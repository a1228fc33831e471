//! Logging initialization and configuration.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Output format selected by `logging.format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Builds the env filter. `RUST_LOG` wins over the configured level.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initializes the logging subsystem based on configuration.
///
/// Job spans (`migration_job`) are closed when a run finishes, so span close
/// events carry the total time spent in each job.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let subscriber = tracing_subscriber::registry().with(env_filter(config));

    match LogFormat::parse(&config.format) {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);
            subscriber.with(json_layer).try_init()
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true);
            subscriber.with(pretty_layer).try_init()
        }
    }
}
