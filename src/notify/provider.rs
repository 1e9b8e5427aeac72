use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::DispatchError;
use crate::models::{Level, ProviderKind};

/// Provider-agnostic push payload.
///
/// When the channel encrypts, `body` is empty and the full message travels in
/// `ciphertext`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub title: String,
    pub body: String,
    pub level: Level,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
}

/// The one outbound capability the dispatcher needs.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, kind: ProviderKind, endpoint: &str, payload: &Payload) -> Result<(), DispatchError>;
}

/// Apprise notification type for a level.
pub fn apprise_type(level: Level) -> &'static str {
    match level {
        Level::Critical => "failure",
        Level::TimeSensitive => "warning",
        Level::Active | Level::Passive => "info",
    }
}

/// HTTP sender covering every provider variant.
pub struct HttpChannelSender {
    client: Client,
}

impl HttpChannelSender {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent(concat!("jjz-alert/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn send_bark(&self, endpoint: &str, payload: &Payload) -> Result<(), DispatchError> {
        let url = endpoint.trim_end_matches('/');
        let request = match &payload.ciphertext {
            Some(ciphertext) => self.client.post(url).form(&[("ciphertext", ciphertext.as_str())]),
            None => self.client.post(url).json(&json!({
                "title": payload.title,
                "body": payload.body,
                "level": payload.level.as_str(),
                "icon": payload.icon,
            })),
        };
        let response = request.send().await.map_err(|e| DispatchError::Network(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DispatchError::Rejected(format!("bark returned {status}: {text}")));
        }

        #[derive(Deserialize)]
        struct BarkResponse {
            code: Option<i64>,
            message: Option<String>,
        }
        if let Ok(parsed) = serde_json::from_str::<BarkResponse>(&text)
            && let Some(code) = parsed.code
            && code != 200
        {
            return Err(DispatchError::Rejected(format!(
                "bark code {code}: {}",
                parsed.message.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn send_json(&self, endpoint: &str, body: serde_json::Value) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!("{endpoint} returned {status}: {text}")));
        }
        Ok(())
    }
}

impl Default for HttpChannelSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, kind: ProviderKind, endpoint: &str, payload: &Payload) -> Result<(), DispatchError> {
        debug!(kind = kind.as_str(), encrypted = payload.ciphertext.is_some(), "sending push");
        match kind {
            ProviderKind::Bark => self.send_bark(endpoint, payload).await,
            ProviderKind::Webhook => {
                let body = serde_json::to_value(payload).map_err(|e| DispatchError::Config(e.to_string()))?;
                self.send_json(endpoint, body).await
            }
            ProviderKind::Apprise => {
                let body = json!({
                    "title": payload.title,
                    "body": payload.ciphertext.as_deref().unwrap_or(&payload.body),
                    "type": apprise_type(payload.level),
                });
                self.send_json(endpoint, body).await
            }
        }
    }
}
