//! Scheduled backup jobs: source adapters, destination sinks, the run state machine,
//! the due-job scheduler and the retention sweep.

pub mod backup;
pub mod config;
pub mod engine;
pub mod errors;
pub mod export;
pub mod model;
pub mod remote;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
