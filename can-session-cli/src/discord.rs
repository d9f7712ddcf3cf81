//! Discord notification channel
//!
//! Posts engine notifications through the Discord REST API with a bot token.
//! Session start and alerts go to the alert channel (mentioning the alert
//! role when urgent); finished sessions go to the log channel with the trace
//! file attached.

use crate::config::DiscordSettings;
use async_trait::async_trait;
use can_session_engine::{Notification, Notifier};
use reqwest::multipart::{Form, Part};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Errors talking to Discord
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct DiscordNotifier {
    http: reqwest::Client,
    settings: DiscordSettings,
}

impl DiscordNotifier {
    pub fn new(settings: DiscordSettings) -> Result<Self, DiscordError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, settings })
    }

    /// Channel a notification belongs in
    fn channel_for(&self, notification: &Notification) -> &str {
        match notification {
            Notification::SessionEnded { .. } | Notification::ExportFailed { .. } => {
                &self.settings.log_channel
            }
            Notification::SessionStarted { .. } | Notification::Alert(_) => {
                &self.settings.alert_channel
            }
        }
    }

    /// Message text, with Discord timestamps and role mentions
    fn content(&self, notification: &Notification) -> String {
        let text = match notification {
            Notification::SessionEnded { ended_at, .. } => format!(
                "Car session ended at <t:{}:f>, download log here:",
                ended_at.timestamp()
            ),
            other => other.to_string(),
        };

        match (&self.settings.alert_role_id, notification.is_urgent()) {
            (Some(role), true) => format!("<@&{}> {}", role, text),
            _ => text,
        }
    }

    fn payload(&self, content: &str) -> serde_json::Value {
        let roles: Vec<&str> = self.settings.alert_role_id.iter().map(String::as_str).collect();
        json!({
            "content": content,
            "allowed_mentions": { "parse": [], "roles": roles },
        })
    }

    fn messages_url(&self, channel: &str) -> String {
        format!("{}/channels/{}/messages", self.settings.api_base, channel)
    }

    async fn post_message(&self, channel: &str, content: &str) -> Result<(), DiscordError> {
        let response = self
            .http
            .post(self.messages_url(channel))
            .header("Authorization", format!("Bot {}", self.settings.bot_token))
            .json(&self.payload(content))
            .send()
            .await?;
        check_status(response).await
    }

    async fn post_file(&self, channel: &str, content: &str, path: &Path) -> Result<(), DiscordError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| DiscordError::Attachment {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trace.txt".to_string());

        let form = Form::new()
            .text("payload_json", self.payload(content).to_string())
            .part(
                "files[0]",
                Part::bytes(bytes).file_name(file_name).mime_str("text/plain")?,
            );

        let response = self
            .http
            .post(self.messages_url(channel))
            .header("Authorization", format!("Bot {}", self.settings.bot_token))
            .multipart(form)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), DiscordError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DiscordError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let channel = self.channel_for(notification);
        let content = self.content(notification);

        match notification.artifact() {
            Some(path) => self.post_file(channel, &content, path).await?,
            None => self.post_message(channel, &content).await?,
        }

        log::debug!("Posted to Discord channel {}: {}", channel, content);
        Ok(())
    }
}
