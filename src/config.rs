use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{GuildSyncError, GuildSyncResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Optional in config.toml; falls back to env var GUILDSYNC_API_KEY.
    #[serde(default)]
    pub key: String,
    pub guild_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_profile_base_url")]
    pub profile_base_url: String,
    #[serde(default = "default_session_base_url")]
    pub session_base_url: String,
}

fn default_base_url() -> String {
    "https://api.hypixel.net".into()
}

fn default_profile_base_url() -> String {
    "https://api.mojang.com".into()
}

fn default_session_base_url() -> String {
    "https://sessionserver.mojang.com".into()
}

/// Where staff-facing sync notifications go.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscordConfig {
    /// Role mentioned in staff alerts.
    pub admin_role_id: Option<u64>,
    pub log_channel_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Skip the first scheduled firing after startup.
    #[serde(default = "default_true")]
    pub skip_first_tick: bool,
    /// Per-request HTTP timeout for the guild API. Rate-limit waits are not
    /// counted against it.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Dates strictly earlier than this are ignored during reconciliation.
    #[serde(default)]
    pub ignore_before: Option<NaiveDate>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            skip_first_tick: true,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            ignore_before: None,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_interval_minutes() -> u64 {
    15
}

fn default_fetch_timeout_secs() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

fn default_ttl_seconds() -> i64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Returns the configured path, or `<data dir>/guildsync/guildsync.db`,
    /// falling back to the current working directory.
    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        let base = dirs::data_local_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("guildsync").join("guildsync.db")
    }
}

const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

impl AppConfig {
    pub fn validate(&self) -> GuildSyncResult<()> {
        if self.api.key.trim().is_empty() {
            return Err(GuildSyncError::Config(
                "api key missing: set [api].key or GUILDSYNC_API_KEY".into(),
            ));
        }
        if self.api.guild_id.trim().is_empty() {
            return Err(GuildSyncError::Config("[api].guild_id must not be empty".into()));
        }
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.sync.interval_minutes) {
            return Err(GuildSyncError::Config(format!(
                "[sync].interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"
            )));
        }
        if self.sync.fetch_timeout_secs == 0 {
            return Err(GuildSyncError::Config(
                "[sync].fetch_timeout_secs must be at least 1".into(),
            ));
        }
        if !(0..=MAX_TTL_SECONDS).contains(&self.cache.ttl_seconds) {
            return Err(GuildSyncError::Config(format!(
                "[cache].ttl_seconds must be between 0 and {MAX_TTL_SECONDS}"
            )));
        }
        Ok(())
    }
}

fn resolve_config_path() -> GuildSyncResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(GuildSyncError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Parses config text and applies environment overrides.
pub fn parse_config(content: &str) -> GuildSyncResult<AppConfig> {
    let mut config: AppConfig = toml::from_str(content)?;
    if let Ok(key) = std::env::var("GUILDSYNC_API_KEY") {
        if !key.trim().is_empty() {
            config.api.key = key;
        }
    }
    config.validate()?;
    Ok(config)
}

pub fn load_config() -> GuildSyncResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(
        path = %path.display(),
        guild = %config.api.guild_id,
        interval_minutes = config.sync.interval_minutes,
        "config loaded"
    );
    Ok(config)
}
