use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::{Account, ChannelConfig, PlateConfig};
use crate::notify::crypto;
use crate::scheduler::Schedule;
use crate::status_cache::DEFAULT_STATUS_TTL;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub account: Vec<Account>,
    #[serde(default)]
    pub plate: Vec<PlateConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub default_icon: Option<String>,
    #[serde(default = "default_status_ttl")]
    pub status_ttl: String,
    /// Local time (HH:MM) from which cycles report on tomorrow. Empty disables.
    #[serde(default = "default_next_day_after")]
    pub next_day_after: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            timezone: default_timezone(),
            log_level: default_log_level(),
            schedule: default_schedule(),
            default_icon: None,
            status_ttl: default_status_ttl(),
            next_day_after: default_next_day_after(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_schedule() -> String {
    "at:08:00,12:30,19:00,23:55".to_string()
}
fn default_status_ttl() -> String {
    "5m".to_string()
}
fn default_next_day_after() -> String {
    "20:30".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_db_path() -> String {
    "jjz-alert.db".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rules_url")]
    pub url: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: default_rules_url(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_rules_url() -> String {
    "https://yw.jtgl.beijing.gov.cn/jgjxx/services/getRuleWithWeek".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

/// Operator channels for system failure alerts.
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
    /// Minimum gap between two alerts of the same kind.
    #[serde(default = "default_admin_throttle")]
    pub throttle: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            throttle: default_admin_throttle(),
        }
    }
}

fn default_admin_throttle() -> String {
    "1h".to_string()
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.store.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.global.data_dir.join(db_path)
        }
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.global.timezone.parse().unwrap_or(chrono_tz::Asia::Shanghai)
    }

    pub fn status_ttl(&self) -> std::time::Duration {
        humantime::parse_duration(&self.global.status_ttl).unwrap_or(DEFAULT_STATUS_TTL)
    }

    pub fn next_day_after(&self) -> Option<chrono::NaiveTime> {
        parse_next_day_after(&self.global.next_day_after).ok().flatten()
    }

    pub fn admin_throttle(&self) -> std::time::Duration {
        humantime::parse_duration(&self.admin.throttle).unwrap_or(std::time::Duration::from_secs(3600))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    config
        .global
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.global.timezone)))?;

    Schedule::parse(&config.global.schedule)
        .map_err(|e| ConfigError::Validation(format!("schedule '{}': {e:#}", config.global.schedule)))?;

    let status_ttl = humantime::parse_duration(&config.global.status_ttl)
        .map_err(|e| ConfigError::Validation(format!("status_ttl '{}': {}", config.global.status_ttl, e)))?;
    if status_ttl.is_zero() || chrono::Duration::from_std(status_ttl).is_err() {
        return Err(ConfigError::Validation(format!("status_ttl '{}' is out of range", config.global.status_ttl)).into());
    }

    parse_next_day_after(&config.global.next_day_after)
        .map_err(|e| ConfigError::Validation(format!("next_day_after '{}': {e}", config.global.next_day_after)))?;

    let mut account_names = HashSet::new();
    for account in &config.account {
        if account.name.is_empty() {
            return Err(ConfigError::Validation("account with empty name".to_string()).into());
        }
        if !account_names.insert(&account.name) {
            return Err(ConfigError::Validation(format!("duplicate account name: '{}'", account.name)).into());
        }
        if account.credential_token.is_empty() {
            return Err(ConfigError::Validation(format!("account '{}': token must not be empty", account.name)).into());
        }
    }

    let mut plates = HashSet::new();
    for plate in &config.plate {
        if plate.plate.is_empty() {
            return Err(ConfigError::Validation("plate entry with empty plate number".to_string()).into());
        }
        if !plates.insert(&plate.plate) {
            return Err(ConfigError::Validation(format!("duplicate plate: '{}'", plate.plate)).into());
        }

        validate_channels(&format!("plate '{}'", plate.plate), &plate.channels)?;
    }

    validate_channels("admin", &config.admin.channels)?;
    humantime::parse_duration(&config.admin.throttle)
        .map_err(|e| ConfigError::Validation(format!("admin throttle '{}': {}", config.admin.throttle, e)))?;

    if config.api.enabled && config.api.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!("api listen address '{}' is invalid", config.api.listen)).into());
    }

    Ok(())
}

fn validate_channels(owner: &str, channels: &[ChannelConfig]) -> Result<(), ConfigError> {
    for (index, channel) in channels.iter().enumerate() {
        if channel.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{owner} channel #{index}: endpoint must not be empty"
            )));
        }
        if let Some(encryption) = &channel.encryption
            && encryption.enabled
        {
            crypto::validate_key_iv(encryption.key.as_deref(), encryption.iv.as_deref())
                .map_err(|e| ConfigError::Validation(format!("{owner} channel #{index}: {e}")))?;
        }
    }
    Ok(())
}

/// `Ok(None)` when the next-day switch is disabled.
fn parse_next_day_after(value: &str) -> Result<Option<chrono::NaiveTime>, chrono::ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    chrono::NaiveTime::parse_from_str(value, "%H:%M").map(Some)
}
