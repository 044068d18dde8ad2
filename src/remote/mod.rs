// backupjobs/src/remote/mod.rs
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::RemoteConfig;
use crate::errors::{AppError, Result};

/// Where a peer accepts dropped files.
pub const DROP_UPLOAD_PATH: &str = "drop/upload";

pub fn drop_delete_path(remote_id: &str) -> String {
    format!("drop/{}", remote_id)
}

/// Answer of the peer's file-drop facility to an upload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DropReceipt {
    pub id: String,
    pub url: String,
}

/// HTTP handle for another installation.
#[derive(Debug, Clone)]
pub struct Remote {
    id: String,
    title: String,
    base_url: Url,
    api_key: Option<String>,
    client: Client,
}

impl Remote {
    pub fn new(config: &RemoteConfig, client: Client) -> Self {
        Remote {
            id: config.id.clone(),
            title: config.title.clone(),
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url_for(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// GET returning the raw response so large bodies can be streamed.
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url_for(path)?;
        debug!(remote = %self.id, %url, "remote GET");
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(response.error_for_status()?)
    }

    /// GET of an absolute URL handed out by this peer (e.g. a drop link).
    ///
    /// The API key is only sent when the URL has the same origin as the peer's base URL.
    pub async fn get_absolute(&self, url: &str) -> Result<Response> {
        let url = Url::parse(url)?;
        let request = if url.origin() == self.base_url.origin() {
            self.authorize(self.client.get(url))
        } else {
            debug!(remote = %self.id, %url, "foreign origin, sending without credentials");
            self.client.get(url)
        };
        let response = request.send().await?;
        Ok(response.error_for_status()?)
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let url = self.url_for(path)?;
        debug!(remote = %self.id, %url, "remote POST");
        let response = self
            .authorize(self.client.post(url).json(body))
            .send()
            .await?;
        Ok(response.error_for_status()?)
    }

    /// Multipart upload of a named file.
    pub async fn upload(&self, path: &str, bytes: Vec<u8>, filename: &str) -> Result<Response> {
        let url = self.url_for(path)?;
        debug!(remote = %self.id, %url, size = bytes.len(), filename, "remote upload");
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/zip")?;
        let form = Form::new().part("file", part);
        let response = self
            .authorize(self.client.post(url).multipart(form))
            .send()
            .await?;
        Ok(response.error_for_status()?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url_for(path)?;
        debug!(remote = %self.id, %url, "remote DELETE");
        self.authorize(self.client.delete(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Uploads to the peer's file drop and returns the peer's id and URL for the file.
    pub async fn drop_file(&self, bytes: Vec<u8>, filename: &str) -> Result<DropReceipt> {
        let response = self.upload(DROP_UPLOAD_PATH, bytes, filename).await?;
        let receipt: DropReceipt = response.json().await?;
        if receipt.id.is_empty() {
            return Err(AppError::remote(format!(
                "remote {} accepted the upload but returned no id",
                self.id
            )));
        }
        Ok(receipt)
    }
}

/// Resolves remote references from job configuration to peer handles.
#[derive(Debug, Clone, Default)]
pub struct RemoteRegistry {
    remotes: HashMap<String, Remote>,
}

impl RemoteRegistry {
    pub fn from_configs(configs: &[RemoteConfig], timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let remotes = configs
            .iter()
            .map(|config| (config.id.clone(), Remote::new(config, client.clone())))
            .collect();
        Ok(RemoteRegistry { remotes })
    }

    pub fn lookup(&self, id: &str) -> Option<&Remote> {
        self.remotes.get(id)
    }
}
