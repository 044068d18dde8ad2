// backupjobs/src/model/job.rs
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};
use crate::remote::RemoteRegistry;
use crate::utils::resolve_path;

pub const DEFAULT_JOB_TITLE: &str = "New job";
/// Upper bound for `retention_days` (100 years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Hour,
    Day,
    Month,
    /// Anything else; a job with this unit is never scheduled.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "fs")]
    Fs,
    #[serde(rename = "db")]
    Db,
    #[serde(rename = "remote-db")]
    RemoteDb,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestType {
    #[serde(rename = "fs-local")]
    FsLocal,
    #[serde(rename = "db-local")]
    DbLocal,
    #[serde(rename = "drop-remote")]
    DropRemote,
    #[serde(rename = "db-remote")]
    DbRemote,
    #[serde(other)]
    Unknown,
}

impl DestType {
    pub fn is_remote(self) -> bool {
        matches!(self, DestType::DropRemote | DestType::DbRemote)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: Option<SourceType>,
    pub fs_path: Option<String>,
    #[serde(default)]
    pub fs_is_relative: bool,
    #[serde(default)]
    pub encrypt: bool,
    pub encrypt_password: Option<String>,
    #[serde(default)]
    pub database_full: bool,
    pub remote: Option<String>,
    #[serde(default)]
    pub include_dot_env: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestConfig {
    #[serde(rename = "type")]
    pub kind: Option<DestType>,
    pub fs_path: Option<String>,
    #[serde(default)]
    pub fs_is_relative: bool,
    pub remote: Option<String>,
}

/// A schedulable backup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub title: String,
    pub enabled: bool,
    pub interval: u32,
    pub interval_unit: IntervalUnit,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub retention_days: u32,
    pub src: SourceConfig,
    pub dest: DestConfig,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub title: Option<String>,
    pub enabled: Option<bool>,
    pub interval: Option<u32>,
    pub interval_unit: Option<IntervalUnit>,
    pub retention_days: Option<u32>,
    pub src: Option<SourceConfig>,
    pub dest: Option<DestConfig>,
}

impl JobPatch {
    pub fn check(&self) -> Result<()> {
        if self.interval == Some(0) {
            return Err(AppError::InvalidJob(
                "interval must be a positive number".to_string(),
            ));
        }
        if let Some(days) = self.retention_days {
            if days == 0 || days > MAX_RETENTION_DAYS {
                return Err(AppError::InvalidJob(format!(
                    "retention_days must be between 1 and {}",
                    MAX_RETENTION_DAYS
                )));
            }
        }
        Ok(())
    }
}

/// What `Job::validate` needs to know about the outside world.
pub struct ValidationContext<'a> {
    pub storage_root: &'a Path,
    pub remotes: &'a RemoteRegistry,
}

impl Job {
    /// New jobs start disabled with a one day interval and are due as soon as they are enabled.
    pub fn new(id: u64, title: Option<&str>, retention_days: u32, now: DateTime<Utc>) -> Self {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_JOB_TITLE)
            .to_string();
        let mut job = Job {
            id,
            title,
            enabled: false,
            interval: 1,
            interval_unit: IntervalUnit::Day,
            last_run: None,
            next_run: None,
            retention_days,
            src: SourceConfig::default(),
            dest: DestConfig::default(),
        };
        job.calc_next_run(now);
        job
    }

    /// Recomputes `next_run` from `last_run`, `interval` and `interval_unit`.
    ///
    /// Without a previous run the job is due immediately. Otherwise the interval is added to
    /// the current time using calendar arithmetic, so month steps clamp to the end of shorter
    /// months instead of overflowing. An unknown unit always clears `next_run`, even before
    /// the first run.
    pub fn calc_next_run(&mut self, now: DateTime<Utc>) {
        if self.interval_unit == IntervalUnit::Unknown {
            self.next_run = None;
            return;
        }
        if self.last_run.is_none() {
            self.next_run = Some(now);
            return;
        }
        self.next_run = advance(now, self.interval, self.interval_unit);
    }

    /// Records a successful run at `now` and moves the schedule forward.
    pub fn mark_ran(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.calc_next_run(now);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| next <= now)
    }

    /// Applies `patch`, or leaves the job untouched when a value is out of range.
    pub fn apply_patch(&mut self, patch: JobPatch, now: DateTime<Utc>) -> Result<()> {
        patch.check()?;
        let mut reschedule = false;
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(interval) = patch.interval {
            self.interval = interval;
            reschedule = true;
        }
        if let Some(unit) = patch.interval_unit {
            self.interval_unit = unit;
            reschedule = true;
        }
        if let Some(days) = patch.retention_days {
            self.retention_days = days;
        }
        if let Some(src) = patch.src {
            self.src = src;
        }
        if let Some(dest) = patch.dest {
            self.dest = dest;
        }
        if reschedule {
            self.calc_next_run(now);
        }
        Ok(())
    }

    pub fn source_path(&self, storage_root: &Path) -> Option<PathBuf> {
        self.src
            .fs_path
            .as_deref()
            .map(|p| resolve_path(storage_root, p, self.src.fs_is_relative))
    }

    pub fn dest_path(&self, storage_root: &Path) -> Option<PathBuf> {
        self.dest
            .fs_path
            .as_deref()
            .map(|p| resolve_path(storage_root, p, self.dest.fs_is_relative))
    }

    /// Pre-flight configuration check. Returns the reason the job cannot run, if any.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> Option<String> {
        match self.src.kind {
            Some(SourceType::RemoteDb) => match self.src.remote.as_deref() {
                None | Some("") => return Some("No source remote provided".to_string()),
                Some(id) if ctx.remotes.lookup(id).is_none() => {
                    return Some(format!("Unknown source remote: {}", id));
                }
                Some(_) => {}
            },
            Some(SourceType::Fs) => match self.source_path(ctx.storage_root) {
                None => return Some("No source path provided".to_string()),
                Some(path) if !path.exists() => {
                    return Some(format!("Source path does not exist: {}", path.display()));
                }
                Some(_) => {}
            },
            _ => {}
        }

        match self.dest.kind {
            Some(kind) if kind.is_remote() => match self.dest.remote.as_deref() {
                None | Some("") => return Some("No destination remote provided".to_string()),
                Some(id) if ctx.remotes.lookup(id).is_none() => {
                    return Some(format!("Unknown destination remote: {}", id));
                }
                Some(_) => {}
            },
            Some(DestType::FsLocal) => match self.dest_path(ctx.storage_root) {
                None => return Some("No destination path provided".to_string()),
                Some(path) if !path.exists() => {
                    return Some(format!("Destination path does not exist: {}", path.display()));
                }
                Some(_) => {}
            },
            _ => {}
        }

        None
    }
}

fn advance(from: DateTime<Utc>, interval: u32, unit: IntervalUnit) -> Option<DateTime<Utc>> {
    match unit {
        IntervalUnit::Hour => from.checked_add_signed(Duration::hours(i64::from(interval))),
        IntervalUnit::Day => from.checked_add_signed(Duration::days(i64::from(interval))),
        IntervalUnit::Month => from.checked_add_months(Months::new(interval)),
        IntervalUnit::Unknown => None,
    }
}
