use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{channel::ChannelType, retry::RetryConfig},
    registry::{RegistryEntry, WorkerRole},
};

pub const ENV_PREFIX: &str = "NOTIFICATION_MANAGER_";

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Server,
    Master,
    Slave,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub role: ProcessRole,
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Required for slaves.
    #[serde(default)]
    pub channel_type: Option<ChannelType>,

    pub broker_uri: String,
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    /// Falls back to the queue name.
    #[serde(default)]
    pub binding_key: Option<String>,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    pub database_url: String,

    pub redis_url: String,
    #[serde(default = "default_task_state_ttl_seconds")]
    pub task_state_ttl_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub email_api_key: String,
    #[serde(default = "default_email_base_url")]
    pub email_base_url: String,
    #[serde(default)]
    pub email_domain: String,
    #[serde(default = "default_email_sender")]
    pub email_sender: String,
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    #[serde(default = "default_discord_api_base")]
    pub discord_api_base: String,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_worker_name() -> String {
    "nt-master".to_string()
}

fn default_queue() -> String {
    "nt-master".to_string()
}

fn default_exchange() -> String {
    "notification_exchange".to_string()
}

fn default_exchange_type() -> String {
    "direct".to_string()
}

fn default_prefetch_count() -> u16 {
    150
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_task_state_ttl_seconds() -> u64 {
    86_400
}

fn default_server_port() -> u16 {
    9030
}

fn default_email_base_url() -> String {
    "https://api.eu.mailgun.net/v3".to_string()
}

fn default_email_sender() -> String {
    "Notifications <noreply@localhost>".to_string()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_iter(std::env::vars())
    }

    /// Parses `NOTIFICATION_MANAGER_*` pairs; other keys are ignored.
    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.role == ProcessRole::Slave && self.channel_type.is_none() {
            return Err(anyhow!(
                "{}CHANNEL_TYPE is required for slave workers",
                ENV_PREFIX
            ));
        }

        if self.prefetch_count == 0 {
            return Err(anyhow!("{}PREFETCH_COUNT must be positive", ENV_PREFIX));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn binding_key(&self) -> String {
        self.binding_key
            .clone()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.default_queue.clone())
    }

    /// The queue this process consumes (or, for the server, publishes to).
    pub fn worker_entry(&self) -> Result<RegistryEntry, Error> {
        let role = match self.role {
            ProcessRole::Server | ProcessRole::Master => WorkerRole::Master,
            ProcessRole::Slave => WorkerRole::Channel(
                self.channel_type
                    .ok_or_else(|| anyhow!("Slave worker has no channel type"))?,
            ),
        };

        Ok(RegistryEntry {
            role,
            name: self.worker_name.clone(),
            queue_name: self.default_queue.clone(),
            exchange_name: self.exchange.clone(),
            exchange_type: self.exchange_type.clone(),
            binding_key: self.binding_key(),
        })
    }
}
