//! Notification channels.
//!
//! `log` writes through tracing and always succeeds. The webhook channels
//! (telegram/discord/slack) pull credentials from the environment; when a
//! credential is missing the builder falls back to `log` with a note.

use async_trait::async_trait;

use crate::config::ChannelKind;
use crate::error::{Error, Result};

/// A formatted notification
#[derive(Debug, Clone)]
pub struct ReportMessage {
    pub subject: String,
    pub body: String,
}

impl ReportMessage {
    pub fn render(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

/// Deliver a formatted message somewhere
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, message: &ReportMessage) -> Result<()>;
}

/// Always-available fallback: write the message to the log
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &ReportMessage) -> Result<()> {
        tracing::info!(target: "tram::report", "{}", message.render());
        Ok(())
    }
}

/// Discard everything, successfully
pub struct NoneChannel;

#[async_trait]
impl Channel for NoneChannel {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn deliver(&self, _message: &ReportMessage) -> Result<()> {
        Ok(())
    }
}

enum WebhookTarget {
    Telegram { token: String, chat_id: String },
    Discord { url: String },
    Slack { url: String },
}

/// HTTP webhook delivery for telegram/discord/slack
pub struct WebhookChannel {
    target: WebhookTarget,
    client: reqwest::Client,
}

impl WebhookChannel {
    fn telegram() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        Some(Self {
            target: WebhookTarget::Telegram { token, chat_id },
            client: reqwest::Client::new(),
        })
    }

    fn discord() -> Option<Self> {
        let url = std::env::var("DISCORD_WEBHOOK_URL").ok()?;
        Some(Self {
            target: WebhookTarget::Discord { url },
            client: reqwest::Client::new(),
        })
    }

    fn slack() -> Option<Self> {
        let url = std::env::var("SLACK_WEBHOOK_URL").ok()?;
        Some(Self {
            target: WebhookTarget::Slack { url },
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        match self.target {
            WebhookTarget::Telegram { .. } => "telegram",
            WebhookTarget::Discord { .. } => "discord",
            WebhookTarget::Slack { .. } => "slack",
        }
    }

    async fn deliver(&self, message: &ReportMessage) -> Result<()> {
        let text = message.render();
        let response = match &self.target {
            WebhookTarget::Telegram { token, chat_id } => {
                let url = format!("https://api.telegram.org/bot{token}/sendMessage");
                self.client
                    .post(url)
                    .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
                    .send()
                    .await
            }
            WebhookTarget::Discord { url } => {
                self.client
                    .post(url)
                    .json(&serde_json::json!({ "content": text }))
                    .send()
                    .await
            }
            WebhookTarget::Slack { url } => {
                self.client
                    .post(url)
                    .json(&serde_json::json!({ "text": text }))
                    .send()
                    .await
            }
        };

        let response = response
            .map_err(|e| Error::ResourceUnavailable(format!("{} delivery failed: {e}", self.name())))?;
        if !response.status().is_success() {
            return Err(Error::ResourceUnavailable(format!(
                "{} delivery returned {}",
                self.name(),
                response.status()
            )));
        }
        Ok(())
    }
}

/// Build the channel for a configured kind, falling back to `log` when the
/// required environment credentials are absent.
pub fn build_channel(kind: ChannelKind) -> Box<dyn Channel> {
    match kind {
        ChannelKind::Log => Box::new(LogChannel),
        ChannelKind::None => Box::new(NoneChannel),
        ChannelKind::Telegram => match WebhookChannel::telegram() {
            Some(channel) => Box::new(channel),
            None => {
                tracing::warn!(
                    "telegram channel selected but TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID missing, using log"
                );
                Box::new(LogChannel)
            }
        },
        ChannelKind::Discord => match WebhookChannel::discord() {
            Some(channel) => Box::new(channel),
            None => {
                tracing::warn!("discord channel selected but DISCORD_WEBHOOK_URL missing, using log");
                Box::new(LogChannel)
            }
        },
        ChannelKind::Slack => match WebhookChannel::slack() {
            Some(channel) => Box::new(channel),
            None => {
                tracing::warn!("slack channel selected but SLACK_WEBHOOK_URL missing, using log");
                Box::new(LogChannel)
            }
        },
    }
}
