// backupjobs/src/model/backup.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::job::Job;

/// Where the stored copy of a run lives. Exactly one scheme per destination type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    File { path: PathBuf },
    Blob { size: u64 },
    Drop { url: String, remote_id: String },
}

/// One execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: Uuid,
    pub job_id: u64,
    pub timestamp: DateTime<Utc>,
    pub done: bool,
    pub filename: Option<String>,
    pub artifact: Option<Artifact>,
    /// Peer used by a remote destination.
    pub remote: Option<String>,
}

impl BackupRun {
    pub fn new(job: &Job, now: DateTime<Utc>) -> Self {
        let remote = job
            .dest
            .kind
            .filter(|kind| kind.is_remote())
            .and(job.dest.remote.clone());
        BackupRun {
            id: Uuid::new_v4(),
            job_id: job.id,
            timestamp: now,
            done: false,
            filename: None,
            artifact: None,
            remote,
        }
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        match &self.artifact {
            Some(Artifact::File { path }) => Some(path),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.artifact {
            Some(Artifact::Drop { url, .. }) => Some(url),
            _ => None,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match &self.artifact {
            Some(Artifact::Drop { remote_id, .. }) => Some(remote_id),
            _ => None,
        }
    }
}
