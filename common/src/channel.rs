// Outbound message channel and menu message formatting

use crate::config::TelegramConfig;
use crate::errors::ChannelError;
use crate::models::{MenuEntry, UserId};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::instrument;

/// Delivers formatted menu messages to users
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_menu(&self, user_id: UserId, text: &str) -> Result<(), ChannelError>;
}

/// Render a menu snapshot as an HTML chat message
pub fn format_menu_message(location: &str, entries: &[MenuEntry]) -> String {
    if entries.is_empty() {
        return format!("{} currently offers no menus", location);
    }

    let mut message = format!("<b>Current {} Menu:</b>\n", location);
    for entry in entries {
        message.push_str(&format!("<i>{}:</i> {}\n", entry.title, entry.description));
    }
    message
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage` channel
pub struct TelegramChannel {
    client: Client,
    send_message_url: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                ChannelError::RequestFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                config.api_base_url.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    #[instrument(skip(self, text))]
    async fn send_menu(&self, user_id: UserId, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.send_message_url)
            .json(&json!({
                "chat_id": user_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Option<TelegramResponse> = response.json().await.ok();
        match body {
            Some(reply) if status.is_success() && reply.ok => Ok(()),
            reply => Err(ChannelError::Rejected {
                status: status.as_u16(),
                description: reply
                    .and_then(|r| r.description)
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}
