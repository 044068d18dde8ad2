// backupjobs/src/test_support.rs
//! Shared fixtures: throwaway HTTP peers and engines over an in-memory store.
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, RawJsonConfig, RemoteConfig, parse_base_url};
use crate::engine::Engine;
use crate::model::JobPatch;
use crate::store::MemoryStore;

pub const TEST_TOKEN_SECRET: &str = "test-secret";

/// An axum router served on a random local port until dropped.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind to random port");
        let addr = listener.local_addr().expect("should have local addr");
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });
        TestServer {
            addr,
            shutdown: Some(tx),
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.abort();
    }
}

pub fn remote_config(id: &str, url: &str) -> RemoteConfig {
    RemoteConfig {
        id: id.to_string(),
        title: format!("Remote {}", id),
        url: parse_base_url(url).expect("valid remote url"),
        api_key: None,
    }
}

/// Config with the storage root at `storage`, the export endpoint at `export_url` (if any)
/// and the given peers.
pub fn test_config(
    storage: &Path,
    export_url: Option<&str>,
    remotes: Vec<RemoteConfig>,
) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::from_raw(RawJsonConfig::default())?;
    config.storage_root = storage.to_path_buf();
    config.local_export.token_secret = Some(TEST_TOKEN_SECRET.to_string());
    if let Some(url) = export_url {
        config.local_export.base_url = parse_base_url(url)?;
    }
    config.remotes = remotes;
    config.http_timeout = std::time::Duration::from_secs(10);
    Ok(config)
}

/// Engine over a fresh `MemoryStore` with its storage root in a temporary directory.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub storage: TempDir,
}

impl TestEngine {
    pub fn new(export_url: Option<&str>, remotes: Vec<RemoteConfig>) -> anyhow::Result<Self> {
        Self::with_config(|_| {}, export_url, remotes)
    }

    pub fn with_config(
        tweak: impl FnOnce(&mut AppConfig),
        export_url: Option<&str>,
        remotes: Vec<RemoteConfig>,
    ) -> anyhow::Result<Self> {
        let storage = tempfile::tempdir()?;
        let mut config = test_config(storage.path(), export_url, remotes)?;
        tweak(&mut config);
        let engine = Engine::new(config, Arc::new(MemoryStore::new()))?;
        Ok(TestEngine {
            engine: Arc::new(engine),
            storage,
        })
    }

    /// Creates a job and applies `patch` to it.
    pub async fn job(&self, title: &str, patch: JobPatch) -> anyhow::Result<crate::model::Job> {
        let job = self.engine.create_job(Some(title)).await?;
        Ok(self.engine.patch_job(job.id, patch).await?)
    }
}
