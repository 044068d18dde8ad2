use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BACKUP_AREA: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub area: String,
    pub text: String,
    pub job_id: Option<u64>,
    pub backup_id: Option<Uuid>,
}

/// A log entry before the store has assigned it an id.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub area: String,
    pub text: String,
    pub job_id: Option<u64>,
    pub backup_id: Option<Uuid>,
}

impl NewLogEntry {
    pub fn backup(text: impl Into<String>, job_id: u64, backup_id: Uuid) -> Self {
        NewLogEntry {
            timestamp: Utc::now(),
            area: BACKUP_AREA.to_string(),
            text: text.into(),
            job_id: Some(job_id),
            backup_id: Some(backup_id),
        }
    }

    pub fn into_entry(self, id: u64) -> LogEntry {
        LogEntry {
            id,
            timestamp: self.timestamp,
            area: self.area,
            text: self.text,
            job_id: self.job_id,
            backup_id: self.backup_id,
        }
    }
}
