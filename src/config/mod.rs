// backupjobs/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::model::job::MAX_RETENTION_DAYS;

pub const CONFIG_PATH_ENV: &str = "BACKUPJOBS_CONFIG";
pub const DATABASE_URL_ENV: &str = "BACKUPJOBS_DATABASE_URL";
pub const TOKEN_SECRET_ENV: &str = "BACKUPJOBS_TOKEN_SECRET";

const DEFAULT_STORAGE_ROOT: &str = "./storage";
const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 1800;
const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 10_000;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_ORPHAN_RETENTION_DAYS: u32 = 8;
const DEFAULT_EXPORT_URL: &str = "http://127.0.0.1:8080/api/";
const DEFAULT_TOKEN_TTL_SECS: u64 = 300;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSchedulerConfig {
    pub interval_seconds: Option<u64>,
    pub allow_overlap: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRetentionConfig {
    pub interval_seconds: Option<u64>,
    pub orphan_retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonExportConfig {
    pub base_url: Option<String>,
    pub token_secret: Option<String>,
    pub token_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRemoteConfig {
    pub id: String,
    pub title: Option<String>,
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonLoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub storage_root: Option<PathBuf>,
    pub default_retention_days: Option<u32>,
    pub database_url: Option<String>,
    pub http_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub scheduler: JsonSchedulerConfig,
    #[serde(default)]
    pub retention: JsonRetentionConfig,
    #[serde(default)]
    pub local_export: JsonExportConfig,
    #[serde(default)]
    pub remotes: Vec<JsonRemoteConfig>,
    #[serde(default)]
    pub logging: JsonLoggingConfig,
}

// Application's internal configuration structs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub allow_overlap: bool,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub interval: Duration,
    pub orphan_retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub base_url: Url,
    pub token_secret: Option<String>,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub id: String,
    pub title: String,
    pub url: Url,
    pub api_key: Option<String>,
}

/// Process-wide settings, built once and handed to the engine at construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub default_retention_days: u32,
    pub database_url: Option<String>,
    pub http_timeout: Duration,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub local_export: ExportConfig,
    pub remotes: Vec<RemoteConfig>,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        let mut config = Self::from_raw(raw_json_config)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Path of the config file: `BACKUPJOBS_CONFIG` or `config.json` in the working directory.
    pub fn default_path() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.json"))
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let storage_root = raw
            .storage_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
        if storage_root.to_string_lossy().is_empty() {
            return Err(anyhow::anyhow!("storage_root cannot be empty in config.json."));
        }

        let default_retention_days = raw.default_retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        if default_retention_days == 0 || default_retention_days > MAX_RETENTION_DAYS {
            anyhow::bail!(
                "default_retention_days must be between 1 and {} days",
                MAX_RETENTION_DAYS
            );
        }

        let scheduler = SchedulerConfig {
            interval: positive_secs(
                raw.scheduler.interval_seconds,
                DEFAULT_SCHEDULER_INTERVAL_SECS,
                "scheduler.interval_seconds",
            )?,
            allow_overlap: raw.scheduler.allow_overlap.unwrap_or(false),
        };

        let orphan_retention_days = raw
            .retention
            .orphan_retention_days
            .unwrap_or(DEFAULT_ORPHAN_RETENTION_DAYS);
        if orphan_retention_days == 0 || orphan_retention_days > MAX_RETENTION_DAYS {
            anyhow::bail!(
                "retention.orphan_retention_days must be between 1 and {} days",
                MAX_RETENTION_DAYS
            );
        }
        let retention = RetentionConfig {
            interval: positive_secs(
                raw.retention.interval_seconds,
                DEFAULT_RETENTION_INTERVAL_SECS,
                "retention.interval_seconds",
            )?,
            orphan_retention_days,
        };

        let export_url = raw
            .local_export
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_EXPORT_URL);
        let local_export = ExportConfig {
            base_url: parse_base_url(export_url)
                .context("local_export.base_url is not a valid URL")?,
            token_secret: raw.local_export.token_secret.filter(|s| !s.is_empty()),
            token_ttl: positive_secs(
                raw.local_export.token_ttl_seconds,
                DEFAULT_TOKEN_TTL_SECS,
                "local_export.token_ttl_seconds",
            )?,
        };

        Ok(AppConfig {
            storage_root,
            default_retention_days,
            database_url: raw.database_url.filter(|s| !s.is_empty()),
            http_timeout: positive_secs(
                raw.http_timeout_seconds,
                DEFAULT_HTTP_TIMEOUT_SECS,
                "http_timeout_seconds",
            )?,
            scheduler,
            retention,
            local_export,
            remotes: parse_remotes(raw.remotes)?,
            logging: LoggingConfig {
                level: raw.logging.level.unwrap_or_else(|| "info".to_string()),
                format: raw.logging.format.unwrap_or_default(),
            },
        })
    }

    /// Secrets and the database URL may come from the environment (or `.env`) instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.database_url = Some(url);
            }
        }
        if let Ok(secret) = env::var(TOKEN_SECRET_ENV) {
            if !secret.is_empty() {
                self.local_export.token_secret = Some(secret);
            }
        }
    }
}

fn positive_secs(value: Option<u64>, default: u64, key: &str) -> Result<Duration> {
    match value.unwrap_or(default) {
        0 => Err(anyhow::anyhow!("{} must be greater than zero", key)),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Parses a base URL and makes sure it ends with `/` so relative paths join below it.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("Invalid URL: {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_remotes(raw: Vec<JsonRemoteConfig>) -> Result<Vec<RemoteConfig>> {
    let mut seen = HashSet::new();
    let mut remotes = Vec::with_capacity(raw.len());
    for remote in raw {
        let id = remote.id.trim().to_string();
        if id.is_empty() {
            anyhow::bail!("remote entries in config.json must have a non-empty id");
        }
        if !seen.insert(id.clone()) {
            anyhow::bail!("duplicate remote id in config.json: {}", id);
        }
        let url = parse_base_url(&remote.url)
            .with_context(|| format!("remote {} has an invalid url", id))?;
        remotes.push(RemoteConfig {
            title: remote.title.unwrap_or_else(|| id.clone()),
            id,
            url,
            api_key: remote.api_key.filter(|s| !s.is_empty()),
        });
    }
    Ok(remotes)
}
