// backupjobs/src/retention/mod.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes backups older than their job's retention window.
#[derive(Clone)]
pub struct Sweeper {
    engine: Arc<Engine>,
}

impl Sweeper {
    pub fn new(engine: Arc<Engine>) -> Self {
        Sweeper { engine }
    }

    /// One pass over all stored backups.
    ///
    /// Backups whose job no longer exists use `retention.orphan_retention_days`. A backup taken
    /// exactly at the cutoff is kept.
    pub async fn tick(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let backups = match self.engine.list_backups().await {
            Ok(backups) => backups,
            Err(e) => {
                warn!(error = %e, "retention sweep could not list backups");
                return report;
            }
        };
        let orphan_days = self.engine.config().retention.orphan_retention_days;
        let mut windows: HashMap<u64, u32> = HashMap::new();

        for backup in backups {
            report.examined += 1;
            let days = match windows.get(&backup.job_id) {
                Some(days) => *days,
                None => {
                    let days = match self.engine.store().find_job(backup.job_id).await {
                        Ok(Some(job)) => job.retention_days,
                        Ok(None) => orphan_days,
                        Err(e) => {
                            warn!(job_id = backup.job_id, error = %e, "could not load job, skipping its backups");
                            report.failed += 1;
                            continue;
                        }
                    };
                    windows.insert(backup.job_id, days);
                    days
                }
            };

            // A window reaching past the representable range keeps everything.
            let Some(cutoff) = Duration::try_days(i64::from(days))
                .and_then(|window| now.checked_sub_signed(window))
            else {
                continue;
            };
            if backup.timestamp >= cutoff {
                continue;
            }
            match self.engine.delete_backup(backup.id).await {
                Ok(()) => {
                    debug!(backup_id = %backup.id, job_id = backup.job_id, retention_days = days, "expired backup removed");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(backup_id = %backup.id, error = %e, "failed to delete expired backup");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            deleted = report.deleted,
            failed = report.failed,
            "retention sweep finished"
        );
        report
    }

    /// Runs `tick` every `retention.interval` on a background task.
    pub fn start(self) -> JoinHandle<()> {
        let interval = self.engine.config().retention.interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                self.tick(Utc::now()).await;
            }
        })
    }
}
