//! Entity store contract: typed records for jobs, backup runs, blobs and log entries.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{BackupRun, Job, LogEntry, NewLogEntry};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Next job id; ids are handed out monotonically and never reused.
    async fn allocate_job_id(&self) -> Result<u64>;
    async fn save_job(&self, job: &Job) -> Result<()>;
    async fn find_job(&self, id: u64) -> Result<Option<Job>>;
    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn delete_job(&self, id: u64) -> Result<bool>;

    async fn save_backup(&self, backup: &BackupRun) -> Result<()>;
    async fn find_backup(&self, id: Uuid) -> Result<Option<BackupRun>>;
    async fn list_backups(&self) -> Result<Vec<BackupRun>>;
    /// Removes the record together with its blob and log entries.
    async fn delete_backup(&self, id: Uuid) -> Result<bool>;

    async fn save_blob(&self, backup_id: Uuid, bytes: &[u8]) -> Result<()>;
    async fn load_blob(&self, backup_id: Uuid) -> Result<Option<Vec<u8>>>;

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry>;
    /// Entries for one run, oldest first.
    async fn logs_for_backup(&self, backup_id: Uuid) -> Result<Vec<LogEntry>>;
    /// Entries for every run of a job, oldest first.
    async fn logs_for_job(&self, job_id: u64) -> Result<Vec<LogEntry>>;
}
