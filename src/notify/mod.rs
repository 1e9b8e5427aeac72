pub mod crypto;
pub mod provider;

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::models::{ChannelConfig, DispatchOutcome, Level};
use provider::{ChannelSender, Payload};

/// Used when neither channel, plate nor global config names an icon.
pub const FALLBACK_ICON: &str = "https://raw.githubusercontent.com/Vsoda/jjz-alert/main/assets/jjz.png";

/// What is being sent for one plate, before per-channel options apply.
#[derive(Debug, Clone)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub level: Level,
    pub plate_icon: Option<String>,
}

pub struct Dispatcher {
    sender: Arc<dyn ChannelSender>,
    default_icon: Option<String>,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn ChannelSender>, default_icon: Option<String>) -> Self {
        Self { sender, default_icon }
    }

    /// Channel icon, then plate icon, then global default, then the built-in icon.
    pub fn resolve_icon<'a>(&'a self, plate_icon: Option<&'a str>, channel: &'a ChannelConfig) -> &'a str {
        [channel.icon_override.as_deref(), plate_icon, self.default_icon.as_deref()]
            .into_iter()
            .flatten()
            .find(|icon| !icon.trim().is_empty())
            .unwrap_or(FALLBACK_ICON)
    }

    /// Stable label for reports that does not expose the push key in the endpoint.
    pub fn channel_id(index: usize, channel: &ChannelConfig) -> String {
        let digest = Sha256::digest(channel.endpoint.as_bytes());
        let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        format!("{}#{index}:{short}", channel.kind.as_str())
    }

    pub fn build_payload(&self, message: &Message, channel: &ChannelConfig) -> Result<Payload, DispatchError> {
        let icon = self.resolve_icon(message.plate_icon.as_deref(), channel).to_string();

        let encryption = channel.encryption.as_ref().filter(|e| e.enabled);
        let Some(encryption) = encryption else {
            return Ok(Payload {
                title: message.title.clone(),
                body: message.body.clone(),
                level: message.level,
                icon,
                ciphertext: None,
            });
        };

        let plain = json!({
            "title": message.title,
            "body": message.body,
            "level": message.level.as_str(),
            "icon": icon,
        });
        let plain = serde_json::to_vec(&plain).map_err(|e| DispatchError::Config(e.to_string()))?;
        let ciphertext = crypto::encrypt(&plain, encryption.key.as_deref(), encryption.iv.as_deref())?;

        Ok(Payload {
            title: message.title.clone(),
            body: String::new(),
            level: message.level,
            icon,
            ciphertext: Some(ciphertext),
        })
    }

    /// Deliver `message` to every channel of `plate`, concurrently and independently.
    ///
    /// Per-channel failures become unsuccessful outcomes. Channels not yet
    /// started when `cancel` fires are skipped; in-flight sends finish.
    pub async fn dispatch(
        &self,
        plate: &str,
        message: &Message,
        channels: &[ChannelConfig],
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        if plate.is_empty() {
            return Err(DispatchError::Config("cannot dispatch for an empty plate".to_string()));
        }
        if channels.is_empty() {
            debug!(plate = %plate, "plate has no channels configured");
            return Ok(Vec::new());
        }

        let attempts = channels.iter().enumerate().map(|(index, channel)| async move {
            if cancel.is_cancelled() {
                return None;
            }
            let channel_id = Self::channel_id(index, channel);
            let result = match self.build_payload(message, channel) {
                Ok(payload) => self.sender.send(channel.kind, &channel.endpoint, &payload).await,
                Err(e) => Err(e),
            };
            let outcome = match result {
                Ok(()) => {
                    info!(plate = %plate, channel = %channel_id, level = message.level.as_str(), "push delivered");
                    DispatchOutcome {
                        plate: plate.to_string(),
                        channel: channel_id,
                        success: true,
                        error: None,
                        timestamp: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!(plate = %plate, channel = %channel_id, error = %e, "push failed");
                    DispatchOutcome {
                        plate: plate.to_string(),
                        channel: channel_id,
                        success: false,
                        error: Some(e.to_string()),
                        timestamp: Utc::now(),
                    }
                }
            };
            Some(outcome)
        });

        Ok(join_all(attempts).await.into_iter().flatten().collect())
    }
}
