//! Client for the database export endpoint, local or on a peer.

pub mod token;

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ExportConfig;
use crate::errors::{AppError, Result};
use crate::model::SourceConfig;

pub use token::TokenIssuer;

/// Parameters of one export call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub full: bool,
    pub encrypt: bool,
    pub password: Option<String>,
    pub include_env: bool,
}

impl From<&SourceConfig> for ExportRequest {
    fn from(src: &SourceConfig) -> Self {
        ExportRequest {
            full: src.database_full,
            encrypt: src.encrypt,
            password: src.encrypt_password.clone().filter(|p| !p.is_empty()),
            include_env: src.include_dot_env,
        }
    }
}

impl ExportRequest {
    /// Path and query of the export endpoint, relative to an API base URL.
    pub fn path(&self) -> String {
        let kind = if self.full { "full" } else { "data" };
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("encrypt", bool_str(self.encrypt));
        if self.encrypt {
            if let Some(password) = &self.password {
                query.append_pair("password", password);
            }
        }
        query.append_pair("includeEnv", bool_str(self.include_env));
        format!("system/database/download/{}?{}", kind, query.finish())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Calls this installation's own export endpoint as an administrator.
#[derive(Clone)]
pub struct LocalExporter {
    base_url: Url,
    issuer: Option<TokenIssuer>,
    client: Client,
}

impl LocalExporter {
    pub fn from_config(config: &ExportConfig, timeout: Duration) -> Result<Self> {
        let ttl = chrono::Duration::from_std(config.token_ttl)
            .map_err(|e| AppError::Config(format!("token ttl out of range: {e}")))?;
        Ok(LocalExporter {
            base_url: config.base_url.clone(),
            issuer: config
                .token_secret
                .as_deref()
                .map(|secret| TokenIssuer::new(secret.as_bytes(), ttl)),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<Response> {
        let issuer = self.issuer.as_ref().ok_or_else(|| {
            AppError::Config("local_export.token_secret is not configured".to_string())
        })?;
        let url = self.base_url.join(&request.path())?;
        debug!(%url, full = request.full, encrypt = request.encrypt, "requesting local export");
        let response = self
            .client
            .get(url)
            .bearer_auth(issuer.issue_admin()?)
            .send()
            .await?;
        Ok(response.error_for_status()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_path_encodes_parameters() {
        let request = ExportRequest {
            full: true,
            encrypt: true,
            password: Some("p w&d".to_string()),
            include_env: false,
        };
        assert_eq!(
            request.path(),
            "system/database/download/full?encrypt=true&password=p+w%26d&includeEnv=false"
        );
    }

    #[test]
    fn test_password_is_only_sent_when_encrypting() {
        let src = SourceConfig {
            encrypt: false,
            encrypt_password: Some("secret".to_string()),
            include_dot_env: true,
            ..Default::default()
        };
        assert_eq!(
            ExportRequest::from(&src).path(),
            "system/database/download/data?encrypt=false&includeEnv=true"
        );
    }
}
