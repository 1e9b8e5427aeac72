use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::{ChannelConfig, DispatchOutcome, Level};
use crate::notify::{Dispatcher, Message};
use crate::resolver::AccountReport;
use crate::store::KvStore;

/// Identifier operator alerts are dispatched under.
pub const ADMIN_IDENTIFIER: &str = "ADMIN";
const ALERT_TITLE: &str = "JJZ系统错误告警";

/// Account failure kinds an operator has to act on.
const ALERT_KINDS: [&str; 2] = ["auth", "network"];

/// Sends operator alerts for failed accounts, at most once per failure kind
/// per throttle window. The window is kept in the store so restarts honour it.
pub struct AdminNotifier {
    store: Arc<dyn KvStore>,
    channels: Vec<ChannelConfig>,
    throttle: Duration,
    tz: Tz,
}

impl AdminNotifier {
    pub fn new(store: Arc<dyn KvStore>, channels: Vec<ChannelConfig>, throttle: Duration, tz: Tz) -> Self {
        Self {
            store,
            channels,
            throttle,
            tz,
        }
    }

    fn key(kind: &str) -> String {
        format!("admin:{kind}")
    }

    pub async fn notify(
        &self,
        dispatcher: &Dispatcher,
        accounts: &[AccountReport],
        cancel: &CancellationToken,
    ) -> Vec<DispatchOutcome> {
        if self.channels.is_empty() {
            return Vec::new();
        }

        let now = Utc::now();
        let mut outcomes = Vec::new();
        for kind in ALERT_KINDS {
            let failed: Vec<&AccountReport> = accounts
                .iter()
                .filter(|a| !a.success && a.error_kind.as_deref() == Some(kind))
                .collect();
            if failed.is_empty() {
                continue;
            }
            if self.throttled(kind).await {
                info!(kind, accounts = failed.len(), "admin alert throttled");
                continue;
            }

            let message = Message {
                title: ALERT_TITLE.to_string(),
                body: self.render(kind, &failed, now),
                level: Level::Critical,
                plate_icon: None,
            };
            match dispatcher.dispatch(ADMIN_IDENTIFIER, &message, &self.channels, cancel).await {
                Ok(sent) => {
                    if sent.iter().any(|o| o.success) {
                        self.mark_sent(kind, now).await;
                    }
                    outcomes.extend(sent);
                }
                Err(e) => warn!(kind, error = %e, "admin alert not dispatched"),
            }
        }
        outcomes
    }

    async fn throttled(&self, kind: &str) -> bool {
        match self.store.get(&Self::key(kind)).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(kind, error = %e, "admin throttle unreadable, alerting anyway");
                false
            }
        }
    }

    async fn mark_sent(&self, kind: &str, now: DateTime<Utc>) {
        let until = chrono::Duration::from_std(self.throttle)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or_else(|| now + chrono::Duration::hours(1));
        let sent_at = now.to_rfc3339();
        if let Err(e) = self.store.set(&Self::key(kind), sent_at.as_bytes(), Some(until)).await {
            warn!(kind, error = %e, "failed to record admin alert, next cycle may repeat it");
        }
    }

    fn render(&self, kind: &str, failed: &[&AccountReport], now: DateTime<Utc>) -> String {
        let names: Vec<&str> = failed.iter().map(|a| a.account.as_str()).collect();
        let details: Vec<&str> = failed.iter().filter_map(|a| a.error.as_deref()).collect();
        let mut lines = vec![
            format!("错误类型: {kind}"),
            format!("账户: {}", names.join(", ")),
        ];
        if !details.is_empty() {
            lines.push(format!("错误描述: {}", details.join("; ")));
        }
        lines.push(format!(
            "发生时间: {}",
            now.with_timezone(&self.tz).format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(suggestion(kind).to_string());
        lines.join("\n")
    }
}

fn suggestion(kind: &str) -> &'static str {
    match kind {
        "auth" => "建议: 进京证Token可能已失效，请更新",
        _ => "建议: 请检查网络连接和API地址",
    }
}
