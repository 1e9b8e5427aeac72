use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Upstream permit/rule query failures. Recoverable by the next cycle.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("authority rejected credentials for account '{account}': {message}")]
    Auth { account: String, message: String },
    #[error("failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::Auth { .. } => "auth",
            FetchError::Parse { .. } => "parse",
        }
    }
}

/// Key-value store failures. Callers degrade to a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Store(#[from] sqlx::Error),
    #[error("cache value could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid channel configuration: {0}")]
    Config(String),
    #[error("provider rejected the push: {0}")]
    Rejected(String),
    #[error("push request failed: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no accounts and no plates configured")]
    EmptyConfiguration,
    #[error("a cycle is already running")]
    CycleInProgress,
    #[error("no plate configuration for: {}", .0.join(", "))]
    UnknownPlates(Vec<String>),
}
