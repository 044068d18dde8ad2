// backupjobs/src/engine.rs
//! Job and backup operations exposed to the outer HTTP layer and the CLI.
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backup::source::{ByteReader, SourceStream};
use crate::backup::{BackupRunner, RunReport};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::export::LocalExporter;
use crate::model::{Artifact, BackupRun, Job, JobPatch, LogEntry, ValidationContext};
use crate::remote::{RemoteRegistry, drop_delete_path};
use crate::store::{MemoryStore, PgStore, Store};

pub const BACKUP_CONTENT_TYPE: &str = "application/zip";

/// A stored backup ready to be streamed to a caller.
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub content_length: Option<u64>,
    pub reader: ByteReader,
}

/// Marks a job as having a run in flight until dropped.
#[derive(Debug)]
pub struct RunPermit {
    job_id: u64,
    in_flight: Option<Arc<DashMap<u64, ()>>>,
}

impl RunPermit {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.remove(&self.job_id);
        }
    }
}

pub struct Engine {
    config: AppConfig,
    store: Arc<dyn Store>,
    remotes: RemoteRegistry,
    exporter: LocalExporter,
    in_flight: Arc<DashMap<u64, ()>>,
}

impl Engine {
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Result<Self> {
        let remotes = RemoteRegistry::from_configs(&config.remotes, config.http_timeout)?;
        let exporter = LocalExporter::from_config(&config.local_export, config.http_timeout)?;
        Ok(Engine {
            config,
            store,
            remotes,
            exporter,
            in_flight: Arc::new(DashMap::new()),
        })
    }

    /// Picks PostgreSQL when a database URL is configured, the in-memory store otherwise.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn Store> = match config.database_url.as_deref() {
            Some(url) => {
                info!("using PostgreSQL entity store");
                Arc::new(PgStore::connect(url).await?)
            }
            None => {
                warn!("no database_url configured, jobs and backups are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Self::new(config, store)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.config.storage_root
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn remotes(&self) -> &RemoteRegistry {
        &self.remotes
    }

    pub fn exporter(&self) -> &LocalExporter {
        &self.exporter
    }

    pub fn validation_context(&self) -> ValidationContext<'_> {
        ValidationContext {
            storage_root: &self.config.storage_root,
            remotes: &self.remotes,
        }
    }

    // Jobs

    pub async fn create_job(&self, title: Option<&str>) -> Result<Job> {
        let id = self.store.allocate_job_id().await?;
        let job = Job::new(id, title, self.config.default_retention_days, Utc::now());
        self.store.save_job(&job).await?;
        info!(job_id = job.id, title = %job.title, "job created");
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list_jobs().await
    }

    pub async fn get_job(&self, id: u64) -> Result<Job> {
        self.store
            .find_job(id)
            .await?
            .ok_or(AppError::JobNotFound(id))
    }

    /// Removes the job only; its runs and their logs stay as history.
    pub async fn delete_job(&self, id: u64) -> Result<()> {
        if !self.store.delete_job(id).await? {
            return Err(AppError::JobNotFound(id));
        }
        info!(job_id = id, "job deleted");
        Ok(())
    }

    pub async fn patch_job(&self, id: u64, patch: JobPatch) -> Result<Job> {
        let mut job = self.get_job(id).await?;
        job.apply_patch(patch, Utc::now())?;
        self.store.save_job(&job).await?;
        debug!(job_id = id, next_run = ?job.next_run, "job updated");
        Ok(job)
    }

    pub async fn validate_job(&self, id: u64) -> Result<Option<String>> {
        let job = self.get_job(id).await?;
        Ok(job.validate(&self.validation_context()))
    }

    /// Runs the job now and waits for the outcome.
    ///
    /// Fails with `JobBusy` while another run of the same job is in flight, unless overlap
    /// is allowed by configuration. Run failures are reported in the returned `RunReport`.
    pub async fn execute_job(&self, id: u64) -> Result<RunReport> {
        let permit = self.begin_run(id)?;
        self.execute_with_permit(permit).await
    }

    pub fn begin_run(&self, job_id: u64) -> Result<RunPermit> {
        if self.config.scheduler.allow_overlap {
            return Ok(RunPermit {
                job_id,
                in_flight: None,
            });
        }
        match self.in_flight.entry(job_id) {
            Entry::Occupied(_) => Err(AppError::JobBusy(job_id)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(RunPermit {
                    job_id,
                    in_flight: Some(Arc::clone(&self.in_flight)),
                })
            }
        }
    }

    pub fn is_running(&self, job_id: u64) -> bool {
        self.in_flight.contains_key(&job_id)
    }

    /// Creates the run record for the permitted job and drives it to completion.
    pub async fn execute_with_permit(&self, permit: RunPermit) -> Result<RunReport> {
        let job = self.get_job(permit.job_id()).await?;
        let run = BackupRun::new(&job, Utc::now());
        self.store.save_backup(&run).await?;
        debug!(job_id = job.id, backup_id = %run.id, "run created");

        let report = BackupRunner::new(self, job, run).execute().await;
        drop(permit);
        Ok(report)
    }

    /// Schedule bookkeeping after a successful run. Reloads the job so edits made while the
    /// run was in flight are kept.
    pub(crate) async fn complete_job(&self, job_id: u64, now: DateTime<Utc>) {
        match self.store.find_job(job_id).await {
            Ok(Some(mut job)) => {
                job.mark_ran(now);
                if let Err(e) = self.store.save_job(&job).await {
                    warn!(job_id, error = %e, "failed to save job schedule");
                }
            }
            Ok(None) => warn!(job_id, "job was deleted while its backup was running"),
            Err(e) => warn!(job_id, error = %e, "failed to load job for schedule update"),
        }
    }

    // Backups

    pub async fn list_backups(&self) -> Result<Vec<BackupRun>> {
        self.store.list_backups().await
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<BackupRun> {
        self.store
            .find_backup(id)
            .await?
            .ok_or(AppError::BackupNotFound(id))
    }

    /// Releases the stored copy, then removes the record and its logs.
    ///
    /// Releasing is best effort: a missing file or a failing remote delete does not keep the
    /// record alive.
    pub async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let run = self.get_backup(id).await?;
        self.release_artifact(&run).await;
        self.store.delete_backup(id).await?;
        info!(backup_id = %id, job_id = run.job_id, "backup deleted");
        Ok(())
    }

    async fn release_artifact(&self, run: &BackupRun) {
        match &run.artifact {
            Some(Artifact::File { path }) => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!(backup_id = %run.id, path = %path.display(), error = %e, "backup file not removed");
                }
            }
            Some(Artifact::Drop { remote_id, .. }) => {
                let Some(remote) = run.remote.as_deref().and_then(|id| self.remotes.lookup(id))
                else {
                    warn!(backup_id = %run.id, remote = ?run.remote, "remote for dropped backup is not configured");
                    return;
                };
                if let Err(e) = remote.delete(&drop_delete_path(remote_id)).await {
                    warn!(backup_id = %run.id, remote = remote.id(), error = %e, "remote delete failed");
                }
            }
            Some(Artifact::Blob { .. }) | None => {}
        }
    }

    pub async fn download_backup(&self, id: Uuid) -> Result<Download> {
        let run = self.get_backup(id).await?;
        let filename = run
            .filename
            .clone()
            .unwrap_or_else(|| format!("backup_{}.zip", run.id));

        let stream = match &run.artifact {
            Some(Artifact::File { path }) => {
                let file = tokio::fs::File::open(path).await?;
                let content_length = file.metadata().await.ok().map(|m| m.len());
                SourceStream {
                    reader: Box::pin(file),
                    content_length,
                    description: path.display().to_string(),
                }
            }
            Some(Artifact::Blob { .. }) => {
                let bytes = self.store.load_blob(id).await?.ok_or_else(|| {
                    AppError::Storage(format!("blob for backup {} is missing", id))
                })?;
                SourceStream {
                    content_length: Some(bytes.len() as u64),
                    reader: Box::pin(std::io::Cursor::new(bytes)),
                    description: "database blob".to_string(),
                }
            }
            Some(Artifact::Drop { url, .. }) => {
                let remote = run
                    .remote
                    .as_deref()
                    .and_then(|rid| self.remotes.lookup(rid))
                    .ok_or_else(|| {
                        AppError::remote(format!("remote for backup {} is not configured", id))
                    })?;
                SourceStream::from_response(remote.get_absolute(url).await?, url.clone())
            }
            None => {
                return Err(AppError::Storage(format!(
                    "backup {} has no stored copy",
                    id
                )));
            }
        };

        Ok(Download {
            filename,
            content_type: BACKUP_CONTENT_TYPE,
            content_length: stream.content_length,
            reader: stream.reader,
        })
    }

    pub async fn backup_log(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        self.get_backup(id).await?;
        self.store.logs_for_backup(id).await
    }

    pub async fn job_log(&self, job_id: u64) -> Result<Vec<LogEntry>> {
        self.store.logs_for_job(job_id).await
    }
}
