// backupjobs/src/backup/run.rs
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sink::destination_sink;
use super::source::source_adapter;
use crate::engine::Engine;
use crate::model::{BackupRun, Job, NewLogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Sourcing,
    Storing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Created => "created",
            RunState::Sourcing => "sourcing",
            RunState::Storing => "storing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a run stopped, and in which state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub stage: RunState,
    pub reason: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (while {})", self.reason, self.stage)
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub backup_id: Uuid,
    pub job_id: u64,
    pub state: RunState,
    pub reason: Option<String>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Drives one run through `created → sourcing → storing → done`.
///
/// Any failure moves the run to `failed`: the reason is appended to the run's log and the
/// run record is kept with `done` unset. Failures never propagate to the caller.
pub struct BackupRunner<'a> {
    engine: &'a Engine,
    job: Job,
    run: BackupRun,
    state: RunState,
}

impl<'a> BackupRunner<'a> {
    pub fn new(engine: &'a Engine, job: Job, run: BackupRun) -> Self {
        BackupRunner {
            engine,
            job,
            run,
            state: RunState::Created,
        }
    }

    pub async fn execute(mut self) -> RunReport {
        let reason = match self.drive().await {
            Ok(()) => None,
            Err(failure) => {
                self.fail(&failure).await;
                Some(failure.reason)
            }
        };
        RunReport {
            backup_id: self.run.id,
            job_id: self.job.id,
            state: self.state,
            reason,
        }
    }

    async fn drive(&mut self) -> Result<(), RunFailure> {
        self.record(format!("Running backup {}: {}", self.job.id, self.job.title))
            .await;

        self.advance(RunState::Sourcing);
        // The job may have changed since the scheduler picked it.
        if let Some(reason) = self.job.validate(&self.engine.validation_context()) {
            return Err(self.abort(reason));
        }
        let adapter = source_adapter(self.job.src.kind).ok_or_else(|| {
            self.abort(format!(
                "Unknown source type: {}",
                type_name(self.job.src.kind)
            ))
        })?;
        let source = adapter
            .fetch(self.engine, &self.job)
            .await
            .map_err(|e| self.abort(format!("Got error requesting source: {}", e)))?;
        self.record(format!("Fetched {}", source.description)).await;

        self.advance(RunState::Storing);
        let sink = destination_sink(self.job.dest.kind).ok_or_else(|| {
            self.abort(format!(
                "Unknown dest type: {}",
                type_name(self.job.dest.kind)
            ))
        })?;
        let stored = sink
            .store(self.engine, &self.job, &self.run, source)
            .await
            .map_err(|e| self.abort(format!("Got error storing backup: {}", e)))?;
        self.record(format!("Storing backup as: {}", stored.describe()))
            .await;

        self.run.filename = stored.filename;
        self.run.artifact = Some(stored.artifact);
        self.run.done = true;
        if let Err(e) = self.engine.store().save_backup(&self.run).await {
            self.run.done = false;
            return Err(self.abort(format!("Failed to save backup record: {}", e)));
        }
        self.record("Finished").await;
        self.advance(RunState::Done);

        self.engine.complete_job(self.job.id, Utc::now()).await;
        info!(job_id = self.job.id, backup_id = %self.run.id, "backup finished");
        Ok(())
    }

    fn advance(&mut self, next: RunState) {
        debug!(job_id = self.job.id, backup_id = %self.run.id, from = %self.state, to = %next, "run transition");
        self.state = next;
    }

    fn abort(&self, reason: impl Into<String>) -> RunFailure {
        RunFailure {
            stage: self.state,
            reason: reason.into(),
        }
    }

    /// Appends an audit entry for this run and its job.
    async fn record(&self, text: impl Into<String>) {
        let entry = NewLogEntry::backup(text, self.job.id, self.run.id);
        if let Err(e) = self.engine.store().append_log(entry).await {
            warn!(job_id = self.job.id, backup_id = %self.run.id, error = %e, "failed to append run log");
        }
    }

    async fn fail(&mut self, failure: &RunFailure) {
        error!(
            job_id = self.job.id,
            backup_id = %self.run.id,
            state = %failure.stage,
            reason = %failure.reason,
            "backup failed"
        );
        self.record(format!("Error: {}", failure.reason)).await;
        self.state = RunState::Failed;
    }
}

fn type_name<T: fmt::Debug>(kind: Option<T>) -> String {
    kind.map(|k| format!("{:?}", k))
        .unwrap_or_else(|| "not configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use crate::model::{DestConfig, DestType, JobPatch, LogEntry, SourceConfig, SourceType};
    use crate::store::{MemoryStore, Store};
    use crate::test_support::test_config;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Memory store that refuses to persist finished runs.
    struct RejectFinishedRuns(MemoryStore);

    #[async_trait]
    impl Store for RejectFinishedRuns {
        async fn allocate_job_id(&self) -> Result<u64> {
            self.0.allocate_job_id().await
        }
        async fn save_job(&self, job: &Job) -> Result<()> {
            self.0.save_job(job).await
        }
        async fn find_job(&self, id: u64) -> Result<Option<Job>> {
            self.0.find_job(id).await
        }
        async fn list_jobs(&self) -> Result<Vec<Job>> {
            self.0.list_jobs().await
        }
        async fn delete_job(&self, id: u64) -> Result<bool> {
            self.0.delete_job(id).await
        }
        async fn save_backup(&self, backup: &BackupRun) -> Result<()> {
            if backup.done {
                return Err(AppError::Storage("disk full".to_string()));
            }
            self.0.save_backup(backup).await
        }
        async fn find_backup(&self, id: Uuid) -> Result<Option<BackupRun>> {
            self.0.find_backup(id).await
        }
        async fn list_backups(&self) -> Result<Vec<BackupRun>> {
            self.0.list_backups().await
        }
        async fn delete_backup(&self, id: Uuid) -> Result<bool> {
            self.0.delete_backup(id).await
        }
        async fn save_blob(&self, backup_id: Uuid, bytes: &[u8]) -> Result<()> {
            self.0.save_blob(backup_id, bytes).await
        }
        async fn load_blob(&self, backup_id: Uuid) -> Result<Option<Vec<u8>>> {
            self.0.load_blob(backup_id).await
        }
        async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
            self.0.append_log(entry).await
        }
        async fn logs_for_backup(&self, backup_id: Uuid) -> Result<Vec<LogEntry>> {
            self.0.logs_for_backup(backup_id).await
        }
        async fn logs_for_job(&self, job_id: u64) -> Result<Vec<LogEntry>> {
            self.0.logs_for_job(job_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_final_save_never_logs_finished() -> anyhow::Result<()> {
        let storage = tempfile::tempdir()?;
        std::fs::write(storage.path().join("data.sql"), b"rows")?;
        std::fs::create_dir(storage.path().join("out"))?;
        let engine = Engine::new(
            test_config(storage.path(), None, vec![])?,
            Arc::new(RejectFinishedRuns(MemoryStore::new())),
        )?;
        let job = engine.create_job(Some("unsaved")).await?;
        engine
            .patch_job(
                job.id,
                JobPatch {
                    src: Some(SourceConfig {
                        kind: Some(SourceType::Fs),
                        fs_path: Some("data.sql".to_string()),
                        fs_is_relative: true,
                        ..Default::default()
                    }),
                    dest: Some(DestConfig {
                        kind: Some(DestType::FsLocal),
                        fs_path: Some("out".to_string()),
                        fs_is_relative: true,
                        remote: None,
                    }),
                    ..Default::default()
                },
            )
            .await?;

        let report = engine.execute_job(job.id).await?;
        assert_eq!(report.state, RunState::Failed);
        assert!(report.reason.unwrap().starts_with("Failed to save backup record"));

        let texts: Vec<String> = engine
            .backup_log(report.backup_id)
            .await?
            .into_iter()
            .map(|entry| entry.text)
            .collect();
        assert!(!texts.iter().any(|text| text == "Finished"));
        assert!(texts.last().unwrap().starts_with("Error: Failed to save backup record"));
        assert!(!engine.get_backup(report.backup_id).await?.done);
        assert!(engine.get_job(job.id).await?.last_run.is_none());
        Ok(())
    }
}
