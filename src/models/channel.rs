use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Telegram,
    Discord,
    Slack,
    Whatsapp,
}

impl ChannelType {
    pub const ALL: [ChannelType; 5] = [
        ChannelType::Email,
        ChannelType::Telegram,
        ChannelType::Discord,
        ChannelType::Slack,
        ChannelType::Whatsapp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Telegram => "telegram",
            ChannelType::Discord => "discord",
            ChannelType::Slack => "slack",
            ChannelType::Whatsapp => "whatsapp",
        }
    }

    /// Consumer-side entry point for tasks addressed to this channel's workers.
    pub fn task_name(&self) -> String {
        format!("task_send_{}", self.as_str())
    }

    /// Bot channels deliver through per-tenant bot/channel pairs rather than addresses.
    pub fn is_bot_channel(&self) -> bool {
        matches!(
            self,
            ChannelType::Telegram | ChannelType::Discord | ChannelType::Slack
        )
    }
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ChannelType::Email),
            "telegram" => Ok(ChannelType::Telegram),
            "discord" => Ok(ChannelType::Discord),
            "slack" => Ok(ChannelType::Slack),
            "whatsapp" => Ok(ChannelType::Whatsapp),
            other => Err(StoreError::InvalidData(format!(
                "unknown channel type '{}'",
                other
            ))),
        }
    }
}

/// Coarse per-tenant switches: is the channel connected at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationFlags {
    pub email: bool,
    pub telegram: bool,
    pub discord: bool,
    pub slack: bool,
    pub whatsapp: bool,
}

impl IntegrationFlags {
    pub fn is_enabled(&self, channel: ChannelType) -> bool {
        match channel {
            ChannelType::Email => self.email,
            ChannelType::Telegram => self.telegram,
            ChannelType::Discord => self.discord,
            ChannelType::Slack => self.slack,
            ChannelType::Whatsapp => self.whatsapp,
        }
    }

    pub fn enabled_channels(&self) -> Vec<ChannelType> {
        ChannelType::ALL
            .into_iter()
            .filter(|channel| self.is_enabled(*channel))
            .collect()
    }
}
