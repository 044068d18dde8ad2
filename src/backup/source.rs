// backupjobs/src/backup/source.rs
use async_trait::async_trait;
use futures::TryStreamExt;
use std::io;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::archive;
use crate::engine::Engine;
use crate::errors::{AppError, Result};
use crate::export::ExportRequest;
use crate::model::{Job, SourceType};

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Readable data produced by a source adapter.
pub struct SourceStream {
    pub reader: ByteReader,
    pub content_length: Option<u64>,
    pub description: String,
}

impl SourceStream {
    pub fn from_response(response: reqwest::Response, description: String) -> Self {
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other);
        SourceStream {
            reader: Box::pin(StreamReader::new(body)),
            content_length,
            description,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, engine: &Engine, job: &Job) -> Result<SourceStream>;
}

/// Adapter for a configured source type; `None` for unknown or unset types.
pub fn source_adapter(kind: Option<SourceType>) -> Option<&'static dyn SourceAdapter> {
    match kind? {
        SourceType::Fs => Some(&FsSource),
        SourceType::Db => Some(&DbSource),
        SourceType::RemoteDb => Some(&RemoteDbSource),
        SourceType::Unknown => None,
    }
}

/// Streams a file as-is, or a directory packed as a gzip tar archive.
pub struct FsSource;

#[async_trait]
impl SourceAdapter for FsSource {
    async fn fetch(&self, engine: &Engine, job: &Job) -> Result<SourceStream> {
        if job.src.encrypt {
            return Err(AppError::Source(
                "Encryption is not supported for file system sources".to_string(),
            ));
        }
        let path = job
            .source_path(engine.storage_root())
            .ok_or_else(|| AppError::Source("No source path provided".to_string()))?;
        let metadata = tokio::fs::metadata(&path).await?;

        if metadata.is_file() {
            let file = tokio::fs::File::open(&path).await?;
            return Ok(SourceStream {
                reader: Box::pin(file),
                content_length: Some(metadata.len()),
                description: format!("file {}", path.display()),
            });
        }

        debug!(path = %path.display(), "packing directory");
        let dir = path.clone();
        let packed = tokio::task::spawn_blocking(move || archive::pack_directory(&dir)).await??;
        let content_length = packed.metadata().ok().map(|m| m.len());
        Ok(SourceStream {
            reader: Box::pin(tokio::fs::File::from_std(packed)),
            content_length,
            description: format!("archive of {}", path.display()),
        })
    }
}

/// Export of this installation's database.
pub struct DbSource;

#[async_trait]
impl SourceAdapter for DbSource {
    async fn fetch(&self, engine: &Engine, job: &Job) -> Result<SourceStream> {
        let request = ExportRequest::from(&job.src);
        let response = engine.exporter().export(&request).await?;
        Ok(SourceStream::from_response(
            response,
            format!("local database export ({})", if request.full { "full" } else { "data" }),
        ))
    }
}

/// Export of a peer's database.
pub struct RemoteDbSource;

#[async_trait]
impl SourceAdapter for RemoteDbSource {
    async fn fetch(&self, engine: &Engine, job: &Job) -> Result<SourceStream> {
        let remote_id = job
            .src
            .remote
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Source("No remote provided".to_string()))?;
        let remote = engine
            .remotes()
            .lookup(remote_id)
            .ok_or_else(|| AppError::Source(format!("Unknown source remote: {}", remote_id)))?;

        let request = ExportRequest::from(&job.src);
        let response = remote.get(&request.path()).await?;
        Ok(SourceStream::from_response(
            response,
            format!("database export from remote {}", remote.title()),
        ))
    }
}
