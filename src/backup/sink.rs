// backupjobs/src/backup/sink.rs
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::source::SourceStream;
use crate::engine::Engine;
use crate::errors::{AppError, Result};
use crate::model::{Artifact, BackupRun, DestType, Job};
use crate::utils::naming::{backup_filename, backup_filename_with_suffix};

/// Reference to a stored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub filename: Option<String>,
    pub artifact: Artifact,
}

impl Stored {
    pub fn describe(&self) -> String {
        match &self.artifact {
            Artifact::File { path } => path.display().to_string(),
            Artifact::Blob { size } => format!("database blob ({} bytes)", size),
            Artifact::Drop { url, .. } => url.clone(),
        }
    }
}

#[async_trait]
pub trait DestinationSink: Send + Sync {
    async fn store(
        &self,
        engine: &Engine,
        job: &Job,
        run: &BackupRun,
        source: SourceStream,
    ) -> Result<Stored>;
}

/// Sink for a configured destination type; `None` for unknown, unset or unsupported types.
pub fn destination_sink(kind: Option<DestType>) -> Option<&'static dyn DestinationSink> {
    match kind? {
        DestType::FsLocal => Some(&FsLocalSink),
        DestType::DbLocal => Some(&DbLocalSink),
        DestType::DropRemote => Some(&DropRemoteSink),
        DestType::DbRemote | DestType::Unknown => None,
    }
}

/// Largest buffer reserved up front from an advertised content length.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

async fn read_all(mut source: SourceStream) -> Result<Vec<u8>> {
    let reserve = source
        .content_length
        .map(|len| len.min(MAX_PREALLOCATION))
        .and_then(|len| usize::try_from(len).ok())
        .unwrap_or(0);
    let mut bytes = Vec::with_capacity(reserve);
    source.reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

/// Writes `<dest path>/backup_<slug>_<timestamp>.zip`.
pub struct FsLocalSink;

#[async_trait]
impl DestinationSink for FsLocalSink {
    async fn store(
        &self,
        engine: &Engine,
        job: &Job,
        run: &BackupRun,
        mut source: SourceStream,
    ) -> Result<Stored> {
        let dir = job
            .dest_path(engine.storage_root())
            .ok_or_else(|| AppError::destination("No destination path provided"))?;
        let (filename, file_path, mut file) = create_backup_file(&dir, job, run).await?;

        debug!(path = %file_path.display(), "writing backup file");
        if let Err(e) = write_file(&mut file, &mut source).await {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&file_path).await {
                debug!(error = %cleanup, "no partial file to remove");
            }
            return Err(e);
        }

        Ok(Stored {
            filename: Some(filename),
            artifact: Artifact::File { path: file_path },
        })
    }
}

/// Creates a file no other run owns. A taken name gets the short run id appended.
async fn create_backup_file(
    dir: &Path,
    job: &Job,
    run: &BackupRun,
) -> Result<(String, PathBuf, tokio::fs::File)> {
    let now = Utc::now();
    let short_id = run.id.simple().to_string();
    let candidates = [
        backup_filename(&job.title, now),
        backup_filename_with_suffix(&job.title, now, &short_id[..8]),
        backup_filename_with_suffix(&job.title, now, &short_id),
    ];

    for filename in candidates {
        let file_path = dir.join(&filename);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await
        {
            Ok(file) => return Ok((filename, file_path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %file_path.display(), "backup file name taken");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::destination(format!(
        "No free backup file name in {}",
        dir.display()
    )))
}

async fn write_file(file: &mut tokio::fs::File, source: &mut SourceStream) -> Result<u64> {
    let written = tokio::io::copy(&mut source.reader, file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Keeps the bytes as a blob attached to the run record.
pub struct DbLocalSink;

#[async_trait]
impl DestinationSink for DbLocalSink {
    async fn store(
        &self,
        engine: &Engine,
        _job: &Job,
        run: &BackupRun,
        source: SourceStream,
    ) -> Result<Stored> {
        let bytes = read_all(source).await?;
        engine.store().save_blob(run.id, &bytes).await?;
        Ok(Stored {
            filename: None,
            artifact: Artifact::Blob {
                size: bytes.len() as u64,
            },
        })
    }
}

/// Buffers the whole stream and uploads it to a peer's file drop.
pub struct DropRemoteSink;

#[async_trait]
impl DestinationSink for DropRemoteSink {
    async fn store(
        &self,
        engine: &Engine,
        job: &Job,
        _run: &BackupRun,
        source: SourceStream,
    ) -> Result<Stored> {
        let remote_id = job
            .dest
            .remote
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::destination("No destination remote provided"))?;
        let remote = engine.remotes().lookup(remote_id).ok_or_else(|| {
            AppError::destination(format!("Unknown destination remote: {}", remote_id))
        })?;

        let bytes = read_all(source).await?;
        if bytes.is_empty() {
            warn!(job_id = job.id, "uploading an empty backup");
        }
        let filename = backup_filename(&job.title, Utc::now());
        let receipt = remote.drop_file(bytes, &filename).await?;

        Ok(Stored {
            filename: Some(filename),
            artifact: Artifact::Drop {
                url: receipt.url,
                remote_id: receipt.id,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_all_ignores_oversized_length_hint() -> anyhow::Result<()> {
        let source = SourceStream {
            reader: Box::pin(std::io::Cursor::new(b"small body".to_vec())),
            content_length: Some(1 << 40),
            description: "lying peer".to_string(),
        };
        let bytes = read_all(source).await?;
        assert_eq!(bytes, b"small body");
        assert!(bytes.capacity() as u64 <= MAX_PREALLOCATION);
        Ok(())
    }
}
