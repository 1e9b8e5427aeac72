use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One upstream data source (a login on the permit authority).
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(rename = "token")]
    pub credential_token: String,
    #[serde(rename = "url", default = "default_query_url")]
    pub query_url: String,
}

pub const DEFAULT_QUERY_URL: &str = "https://jjz.jtgl.beijing.gov.cn:2443/pro/applyRecordController/stateList";

fn default_query_url() -> String {
    DEFAULT_QUERY_URL.to_string()
}

/// A single permit as reported by the authority. Replaced wholesale on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateRecord {
    pub plate: String,
    pub permit_type: String,
    pub raw_status: String,
    pub valid_start: Option<NaiveDate>,
    pub valid_end: Option<NaiveDate>,
    pub days_remaining: Option<i64>,
    pub source_account: String,
    #[serde(default)]
    pub apply_time: Option<String>,
    /// Remaining in-ring permit applications for the vehicle (`sycs`).
    #[serde(default)]
    pub remaining_uses: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlateConfig {
    pub plate: String,
    pub display_name: Option<String>,
    pub icon: Option<String>,
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

impl PlateConfig {
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.plate)
    }
}

/// Closed set of push providers behind the single send capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Bark,
    Webhook,
    Apprise,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Bark => "bark",
            ProviderKind::Webhook => "webhook",
            ProviderKind::Apprise => "apprise",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    #[serde(rename = "icon")]
    pub icon_override: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    pub key: Option<String>,
    pub iv: Option<String>,
}

/// Notification severity, named after Bark's interruption levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Critical,
    Active,
    TimeSensitive,
    Passive,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Critical => "critical",
            Level::Active => "active",
            Level::TimeSensitive => "timeSensitive",
            Level::Passive => "passive",
        }
    }
}

/// Result of one (plate, channel) delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub plate: String,
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
