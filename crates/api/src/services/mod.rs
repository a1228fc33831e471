//! Engine services: job control, the staged orchestrator, source
//! connectors and quota pacing.

pub mod job_registry;
pub mod migration;
pub mod migration_service;
pub mod rate_limiter;
pub mod sources;

pub use job_registry::{CancelOutcome, JobRegistry};
pub use migration::EngineSettings;
pub use migration_service::MigrationService;
pub use sources::{ConnectorFactory, DefaultConnectorFactory, FixedConnectorFactory};
