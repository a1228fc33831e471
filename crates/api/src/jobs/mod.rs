//! Background job scheduler and job implementations.

mod registry_eviction;
mod scheduler;

pub use registry_eviction::RegistryEvictionJob;
pub use scheduler::JobScheduler;
