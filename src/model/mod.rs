pub mod backup;
pub mod job;
pub mod log;

pub use backup::{Artifact, BackupRun};
pub use job::{DestConfig, DestType, IntervalUnit, Job, JobPatch, SourceConfig, SourceType, ValidationContext};
pub use log::{LogEntry, NewLogEntry};
