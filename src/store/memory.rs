// backupjobs/src/store/memory.rs
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::errors::Result;
use crate::model::{BackupRun, Job, LogEntry, NewLogEntry};

#[derive(Debug, Default)]
struct Inner {
    last_job_id: u64,
    last_log_id: u64,
    jobs: BTreeMap<u64, Job>,
    backups: HashMap<Uuid, BackupRun>,
    blobs: HashMap<Uuid, Vec<u8>>,
    logs: BTreeMap<u64, LogEntry>,
    logs_by_job: HashMap<u64, Vec<u64>>,
    logs_by_backup: HashMap<Uuid, Vec<u64>>,
}

impl Inner {
    fn collect_logs(&self, ids: Option<&Vec<u64>>) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.logs.get(id).cloned())
            .collect();
        entries.sort_by_key(|e| (e.timestamp, e.id));
        entries
    }
}

/// Process-local store: owned collections plus job/backup → log indexes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn allocate_job_id(&self) -> Result<u64> {
        let mut inner = self.inner.write().await;
        inner.last_job_id += 1;
        Ok(inner.last_job_id)
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.last_job_id = inner.last_job_id.max(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_job(&self, id: u64) -> Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.inner.read().await.jobs.values().cloned().collect())
    }

    async fn delete_job(&self, id: u64) -> Result<bool> {
        Ok(self.inner.write().await.jobs.remove(&id).is_some())
    }

    async fn save_backup(&self, backup: &BackupRun) -> Result<()> {
        self.inner
            .write()
            .await
            .backups
            .insert(backup.id, backup.clone());
        Ok(())
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<BackupRun>> {
        Ok(self.inner.read().await.backups.get(&id).cloned())
    }

    async fn list_backups(&self) -> Result<Vec<BackupRun>> {
        let mut backups: Vec<BackupRun> =
            self.inner.read().await.backups.values().cloned().collect();
        backups.sort_by_key(|b| b.timestamp);
        Ok(backups)
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(backup) = inner.backups.remove(&id) else {
            return Ok(false);
        };
        inner.blobs.remove(&id);
        let log_ids = inner.logs_by_backup.remove(&id).unwrap_or_default();
        for log_id in &log_ids {
            inner.logs.remove(log_id);
        }
        if let Some(job_logs) = inner.logs_by_job.get_mut(&backup.job_id) {
            job_logs.retain(|log_id| !log_ids.contains(log_id));
        }
        Ok(true)
    }

    async fn save_blob(&self, backup_id: Uuid, bytes: &[u8]) -> Result<()> {
        self.inner
            .write()
            .await
            .blobs
            .insert(backup_id, bytes.to_vec());
        Ok(())
    }

    async fn load_blob(&self, backup_id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.blobs.get(&backup_id).cloned())
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let mut inner = self.inner.write().await;
        inner.last_log_id += 1;
        let entry = entry.into_entry(inner.last_log_id);
        if let Some(job_id) = entry.job_id {
            inner.logs_by_job.entry(job_id).or_default().push(entry.id);
        }
        if let Some(backup_id) = entry.backup_id {
            inner
                .logs_by_backup
                .entry(backup_id)
                .or_default()
                .push(entry.id);
        }
        inner.logs.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn logs_for_backup(&self, backup_id: Uuid) -> Result<Vec<LogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.collect_logs(inner.logs_by_backup.get(&backup_id)))
    }

    async fn logs_for_job(&self, job_id: u64) -> Result<Vec<LogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.collect_logs(inner.logs_by_job.get(&job_id)))
    }
}
