// backupjobs/src/scheduler/mod.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backup::RunReport;
use crate::engine::Engine;
use crate::errors::{AppError, Result};

/// Decides which jobs are due and dispatches them without waiting for the runs.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<Engine>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Scheduler { engine }
    }

    /// One scan over all jobs. Returns the handles of the runs it started.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<Result<RunReport>>> {
        let jobs = match self.engine.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "scheduler could not list jobs");
                return Vec::new();
            }
        };

        let mut started = Vec::new();
        for job in jobs.into_iter().filter(|job| job.is_due(now)) {
            let permit = match self.engine.begin_run(job.id) {
                Ok(permit) => permit,
                Err(AppError::JobBusy(_)) => {
                    debug!(job_id = job.id, "previous run still in flight, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "could not start run");
                    continue;
                }
            };
            info!(job_id = job.id, title = %job.title, "dispatching due job");
            let engine = Arc::clone(&self.engine);
            started.push(tokio::spawn(async move {
                engine.execute_with_permit(permit).await
            }));
        }
        started
    }

    /// Runs `tick` every `scheduler.interval` on a background task.
    pub fn start(self) -> JoinHandle<()> {
        let interval = self.engine.config().scheduler.interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let started = self.tick(Utc::now()).await;
                debug!(dispatched = started.len(), "scheduler tick finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::RunState;
    use crate::model::{DestConfig, DestType, JobPatch, SourceConfig, SourceType};
    use crate::test_support::{TestEngine, TestServer};
    use axum::Router;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn enabled() -> JobPatch {
        JobPatch {
            enabled: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_tick_dispatches_only_due_jobs() -> anyhow::Result<()> {
        let env = TestEngine::new(None, vec![])?;
        let due = env.job("due", enabled()).await?;
        env.job("disabled", JobPatch::default()).await?;

        let mut later = env.job("later", enabled()).await?;
        later.next_run = Some(Utc::now() + chrono::Duration::hours(1));
        env.engine.store().save_job(&later).await?;

        let mut never = env.job("never", enabled()).await?;
        never.next_run = None;
        env.engine.store().save_job(&never).await?;

        let scheduler = Scheduler::new(Arc::clone(&env.engine));
        let handles = scheduler.tick(Utc::now()).await;
        assert_eq!(handles.len(), 1);
        let mut reports = Vec::new();
        for handle in handles {
            reports.push(handle.await??);
        }
        assert_eq!(reports[0].job_id, due.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_job_stays_due() -> anyhow::Result<()> {
        let env = TestEngine::new(None, vec![])?;
        let job = env.job("unconfigured", enabled()).await?;
        let scheduler = Scheduler::new(Arc::clone(&env.engine));

        for _ in 0..2 {
            let handles = scheduler.tick(Utc::now()).await;
            assert_eq!(handles.len(), 1);
            for handle in handles {
                assert_eq!(handle.await??.state, RunState::Failed);
            }
        }
        assert_eq!(env.engine.list_backups().await?.len(), 2);
        assert!(env.engine.get_job(job.id).await?.last_run.is_none());
        Ok(())
    }

    /// Export endpoint that holds every call until a permit is released.
    async fn slow_export(calls: Arc<AtomicUsize>, release: Arc<Semaphore>) -> TestServer {
        let router = Router::new().route(
            "/api/system/database/download/{kind}",
            get(move || {
                let calls = Arc::clone(&calls);
                let release = Arc::clone(&release);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Ok(permit) = release.acquire().await {
                        permit.forget();
                    }
                    "slow-export"
                }
            }),
        );
        TestServer::start(router).await
    }

    async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("export endpoint saw fewer than {} calls", expected);
    }

    fn db_export_to(dest: DestConfig) -> JobPatch {
        JobPatch {
            enabled: Some(true),
            src: Some(SourceConfig {
                kind: Some(SourceType::Db),
                ..Default::default()
            }),
            dest: Some(dest),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_busy_job_is_skipped_by_next_tick() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));
        let server = slow_export(Arc::clone(&calls), Arc::clone(&release)).await;
        let env = TestEngine::new(Some(&server.url("/api/")), vec![])?;
        let dest = tempfile::tempdir()?;
        let job = env
            .job(
                "slow",
                db_export_to(DestConfig {
                    kind: Some(DestType::FsLocal),
                    fs_path: Some(dest.path().display().to_string()),
                    ..Default::default()
                }),
            )
            .await?;
        let scheduler = Scheduler::new(Arc::clone(&env.engine));

        let first = scheduler.tick(Utc::now()).await;
        assert_eq!(first.len(), 1);
        wait_for_calls(&calls, 1).await;
        assert!(env.engine.is_running(job.id));

        let second = scheduler.tick(Utc::now()).await;
        assert!(second.is_empty());

        release.add_permits(1);
        for handle in first {
            assert!(handle.await??.is_done());
        }
        assert!(!env.engine.is_running(job.id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(env.engine.list_backups().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_overlap_allowed_spawns_independent_runs() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));
        let server = slow_export(Arc::clone(&calls), Arc::clone(&release)).await;
        let env = TestEngine::with_config(
            |c| c.scheduler.allow_overlap = true,
            Some(&server.url("/api/")),
            vec![],
        )?;
        env.job(
            "slow",
            db_export_to(DestConfig {
                kind: Some(DestType::DbLocal),
                ..Default::default()
            }),
        )
        .await?;
        let scheduler = Scheduler::new(Arc::clone(&env.engine));

        let mut handles = scheduler.tick(Utc::now()).await;
        wait_for_calls(&calls, 1).await;
        handles.extend(scheduler.tick(Utc::now()).await);
        assert_eq!(handles.len(), 2);
        wait_for_calls(&calls, 2).await;

        release.add_permits(2);
        let mut backup_ids = Vec::new();
        for handle in handles {
            let report = handle.await??;
            assert!(report.is_done(), "{:?}", report.reason);
            backup_ids.push(report.backup_id);
        }
        assert_ne!(backup_ids[0], backup_ids[1]);
        Ok(())
    }
}
