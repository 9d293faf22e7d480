use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    R2,
    Local,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::R2 => write!(f, "r2"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

/// Which logical unit a dedup marker covers
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// One marker per message
    #[default]
    Message,
    /// One marker per album, listing the album messages archived so far
    MediaGroup,
}

impl std::fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupPolicy::Message => write!(f, "message"),
            DedupPolicy::MediaGroup => write!(f, "media_group"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub dedup: Option<DedupConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default = "default_polling_config")]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat whose media gets archived. Empty means nothing is archived.
    #[serde(default)]
    pub channel_id: String,
    /// Restrict archiving to one forum topic of that chat
    #[serde(default)]
    pub message_thread_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub bucket: String,
    /// Cloudflare account; used to build the R2 endpoint when no endpoint_url is set
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_archive_dir")]
    pub directory: PathBuf,
}

impl StorageConfig {
    /// Explicit endpoint, or the R2 endpoint derived from the account id.
    pub fn effective_endpoint(&self) -> Option<String> {
        if let Some(url) = self.endpoint_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(url.to_string());
        }
        if self.account_id.is_empty() {
            return None;
        }
        Some(format!(
            "https://{}.r2.cloudflarestorage.com",
            self.account_id
        ))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_db_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub policy: DedupPolicy,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Six-field cron expression for purging expired markers
    #[serde(default = "default_purge_cron")]
    pub purge_cron: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    /// Public URL registered with Telegram by `set-webhook`
    #[serde(default)]
    pub public_url: Option<String>,
    /// Sent back by Telegram in X-Telegram-Bot-Api-Secret-Token
    pub secret_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_limit")]
    pub limit: u8,
}

/// Default marker lifetime: one day
pub const DEFAULT_TTL_SECS: u64 = 86_400;

fn default_region() -> String {
    "auto".to_string()
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_dedup_db_path() -> PathBuf {
    PathBuf::from("dedup.db")
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_purge_cron() -> String {
    "0 */10 * * * *".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/telegram/webhook".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_poll_limit() -> u8 {
    100
}

fn default_polling_config() -> PollingConfig {
    PollingConfig {
        timeout_secs: default_poll_timeout_secs(),
        limit: default_poll_limit(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must not be empty");
        }

        if self.storage.backend == StorageBackend::R2 {
            if self.storage.bucket.is_empty() {
                anyhow::bail!("storage.bucket is required for the r2 backend");
            }
            if self.storage.effective_endpoint().is_none() {
                anyhow::bail!("storage.account_id or storage.endpoint_url is required for the r2 backend");
            }
        }

        if let Some(webhook) = &self.webhook {
            if webhook.secret_token.is_empty() {
                anyhow::bail!("webhook.secret_token must not be empty");
            }
            if !webhook.path.starts_with('/') {
                anyhow::bail!("webhook.path must start with '/'");
            }
        }

        // Telegram accepts 1..=100 updates per request
        if !(1..=100).contains(&self.polling.limit) {
            anyhow::bail!("polling.limit must be between 1 and 100");
        }

        Ok(())
    }
}
