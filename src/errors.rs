use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Job {0} not found")]
    JobNotFound(u64),

    #[error("Backup {0} not found")]
    BackupNotFound(Uuid),

    #[error("Invalid job settings: {0}")]
    InvalidJob(String),

    #[error("Job {0} already has a run in progress")]
    JobBusy(u64),

    #[error("Source failed: {0}")]
    Source(String),

    #[error("Destination failed: {0}")]
    Destination(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn destination(msg: impl Into<String>) -> Self {
        Self::Destination(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
