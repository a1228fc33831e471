//! The migration engine proper: staged runs and dry-run support.

mod dry_run;
mod orchestrator;

pub use dry_run::DryRunStore;
pub use orchestrator::{EngineSettings, Orchestrator, RunReport};
