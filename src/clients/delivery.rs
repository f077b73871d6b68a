use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::DeliveryError,
    models::{
        channel::ChannelType,
        delivery::{DeliveryTarget, RenderedMessage},
    },
    worker::deliver::DeliveryAdapter,
};

fn http_client() -> Result<Client, Error> {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

async fn ensure_success(response: Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn bot_token(target: &DeliveryTarget) -> Result<&str, DeliveryError> {
    target
        .bot_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| DeliveryError::InvalidTarget("missing bot token".to_string()))
}

/// The adapter serving `channel`, or `Unsupported` for channels without one.
pub fn adapter_for(
    channel: ChannelType,
    config: &Config,
) -> Result<Arc<dyn DeliveryAdapter>, Error> {
    let adapter: Arc<dyn DeliveryAdapter> = match channel {
        ChannelType::Email => Arc::new(MailgunAdapter::new(
            &config.email_base_url,
            &config.email_domain,
            &config.email_api_key,
            &config.email_sender,
        )?),
        ChannelType::Telegram => Arc::new(TelegramAdapter::new(&config.telegram_api_base)?),
        ChannelType::Discord => Arc::new(DiscordAdapter::new(&config.discord_api_base)?),
        other => return Err(DeliveryError::Unsupported(other).into()),
    };

    info!(channel = %channel, "Delivery adapter initialized");

    Ok(adapter)
}

pub struct MailgunAdapter {
    http_client: Client,
    base_url: String,
    domain: String,
    api_key: String,
    sender: String,
}

impl MailgunAdapter {
    pub fn new(base_url: &str, domain: &str, api_key: &str, sender: &str) -> Result<Self, Error> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        })
    }
}

#[async_trait]
impl DeliveryAdapter for MailgunAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn deliver(
        &self,
        target: &DeliveryTarget,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        if !target.recipient.contains('@') {
            return Err(DeliveryError::InvalidTarget(format!(
                "'{}' is not an email address",
                target.recipient
            )));
        }

        let url = format!("{}/{}/messages", self.base_url, self.domain);

        debug!(recipient = %target.recipient, "Sending email");

        let form = [
            ("from", self.sender.as_str()),
            ("to", target.recipient.as_str()),
            ("subject", message.subject.as_str()),
            ("html", message.body.as_str()),
        ];

        let response = self
            .http_client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        ensure_success(response).await
    }
}

pub struct TelegramAdapter {
    http_client: Client,
    api_base: String,
}

impl TelegramAdapter {
    pub fn new(api_base: &str) -> Result<Self, Error> {
        Ok(Self {
            http_client: http_client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DeliveryAdapter for TelegramAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Telegram
    }

    async fn deliver(
        &self,
        target: &DeliveryTarget,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        let token = bot_token(target)?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);

        debug!(chat_id = %target.recipient, "Sending telegram message");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "chat_id": target.recipient,
                "text": message.body,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;

        ensure_success(response).await
    }
}

pub struct DiscordAdapter {
    http_client: Client,
    api_base: String,
}

impl DiscordAdapter {
    pub fn new(api_base: &str) -> Result<Self, Error> {
        Ok(Self {
            http_client: http_client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DeliveryAdapter for DiscordAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Discord
    }

    async fn deliver(
        &self,
        target: &DeliveryTarget,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        let token = bot_token(target)?;
        let url = format!("{}/channels/{}/messages", self.api_base, target.recipient);

        debug!(channel_id = %target.recipient, "Sending discord message");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bot {}", token))
            .json(&json!({ "content": message.body }))
            .send()
            .await?;

        ensure_success(response).await
    }
}
