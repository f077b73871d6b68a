use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::{
    error::StoreError,
    models::{
        channel::{ChannelType, IntegrationFlags},
        delivery::{CreateDeliveryLog, DeliveryTarget},
        event::EventType,
        preference::{DefaultPreference, PreferenceRow, TenantScope},
    },
    registry::RegistryEntry,
    store::{ConfigStore, LogSink, PreferenceWriter},
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    /// Creates missing tables. Safe to run on every start.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to apply schema: {}", e))?;

        info!("Database schema up to date");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        if self.client.is_closed() {
            return Err(anyhow!("Database connection closed"));
        }

        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }

    async fn email_targets(
        &self,
        tenant_config_id: i64,
        account_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<DeliveryTarget>, StoreError> {
        let row = self
            .client
            .query_opt(
                r#"
                SELECT u.first_name, u.default_email, a.email, n.message_template, n.subject
                FROM user_configs u
                JOIN notification_configs n ON n.user_config = u.id
                LEFT JOIN account_configs a ON a.config_id = u.id AND a.account_id = $3
                WHERE u.id = $1
                  AND n.notification_type = 'email'
                  AND n.event_type = $2
                  AND n.enabled
                ORDER BY n.id
                LIMIT 1
                "#,
                &[&tenant_config_id, &event_type.as_str(), &account_id],
            )
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let first_name: String = row.try_get(0)?;
        let default_email: String = row.try_get(1)?;
        let account_email: Option<String> = row.try_get(2)?;
        let message_template: String = row.try_get(3)?;
        let subject: String = row.try_get(4)?;

        let mut recipients = vec![default_email];
        if let Some(email) = account_email {
            recipients.push(email);
        }
        recipients.retain(|email| !email.trim().is_empty());
        recipients.dedup();

        Ok(recipients
            .into_iter()
            .map(|recipient| DeliveryTarget {
                recipient,
                bot_token: None,
                first_name: first_name.clone(),
                message_template: message_template.clone(),
                subject: subject.clone(),
            })
            .collect())
    }

    async fn bot_targets(
        &self,
        tenant_config_id: i64,
        event_type: EventType,
        channel: ChannelType,
    ) -> Result<Vec<DeliveryTarget>, StoreError> {
        let rows = self
            .client
            .query(
                r#"
                SELECT u.first_name, b.bot_token, c.channel_id, n.message_template, n.subject
                FROM bot_configs b
                JOIN bot_events_rules r ON r.bot_config_id = b.id
                JOIN channel_rules cr ON cr.bot_event_rules_id = r.id
                JOIN notification_configs n ON n.id = r.notification_config_id
                JOIN channel_configs c ON c.id = cr.channel_config_id
                JOIN user_configs u ON u.id = b.user_config
                WHERE b.enabled AND n.enabled AND c.enabled
                  AND b.user_config = $1
                  AND n.event_type = $2
                  AND n.notification_type = $3
                ORDER BY r.id, c.id
                "#,
                &[&tenant_config_id, &event_type.as_str(), &channel.as_str()],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<DeliveryTarget, StoreError> {
                Ok(DeliveryTarget {
                    first_name: row.try_get(0)?,
                    bot_token: Some(row.try_get(1)?),
                    recipient: row.try_get(2)?,
                    message_template: row.try_get(3)?,
                    subject: row.try_get(4)?,
                })
            })
            .collect()
    }
}

fn registry_entry(row: &Row) -> Result<Option<RegistryEntry>, StoreError> {
    let name: String = row.try_get("name")?;
    let worker_type: String = row.try_get("worker_type")?;

    let role = match worker_type.parse() {
        Ok(role) => role,
        Err(e) => {
            warn!(worker = %name, error = %e, "Skipping worker metadata with unknown type");
            return Ok(None);
        }
    };

    Ok(Some(RegistryEntry {
        role,
        name,
        queue_name: row.try_get("queue")?,
        exchange_name: row.try_get("exchange")?,
        exchange_type: row.try_get("exchange_type")?,
        binding_key: row.try_get("binding_key")?,
    }))
}

#[async_trait]
impl ConfigStore for DatabaseClient {
    async fn resolve_tenant_for_account(
        &self,
        account_id: &str,
    ) -> Result<TenantScope, StoreError> {
        let row = self
            .client
            .query_opt(
                r#"
                SELECT a.id, a.config_id, u.user_id
                FROM account_configs a
                JOIN user_configs u ON a.config_id = u.id
                WHERE a.account_id = $1
                "#,
                &[&account_id],
            )
            .await?
            .ok_or_else(|| StoreError::not_found("account", account_id))?;

        Ok(TenantScope {
            account_config_id: Some(row.try_get(0)?),
            tenant_config_id: row.try_get(1)?,
            tenant_id: row.try_get(2)?,
        })
    }

    async fn resolve_tenant(&self, tenant_id: &str) -> Result<TenantScope, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT id FROM user_configs WHERE user_id = $1",
                &[&tenant_id],
            )
            .await?
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))?;

        Ok(TenantScope {
            tenant_id: tenant_id.to_string(),
            tenant_config_id: row.try_get(0)?,
            account_config_id: None,
        })
    }

    async fn get_enabled_channels(
        &self,
        tenant_config_id: i64,
        _account_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<PreferenceRow>, StoreError> {
        let rows = self
            .client
            .query(
                r#"
                SELECT id, notification_type
                FROM notification_configs
                WHERE user_config = $1 AND event_type = $2 AND enabled
                ORDER BY id
                "#,
                &[&tenant_config_id, &event_type.as_str()],
            )
            .await?;

        let mut preferences = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0)?;
            let raw: String = row.try_get(1)?;

            match raw.parse() {
                Ok(channel) => preferences.push(PreferenceRow { id, channel }),
                Err(e) => warn!(preference_id = id, error = %e, "Skipping preference row"),
            }
        }

        Ok(preferences)
    }

    async fn is_channel_blocked_for_account(
        &self,
        account_config_id: i64,
        preference_id: i64,
    ) -> Result<bool, StoreError> {
        let row = self
            .client
            .query_one(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM account_notification_rules
                    WHERE account_config_id = $1 AND notification_config_id = $2 AND disabled
                )
                "#,
                &[&account_config_id, &preference_id],
            )
            .await?;

        Ok(row.try_get(0)?)
    }

    async fn get_integration_flags(
        &self,
        tenant_id: &str,
    ) -> Result<IntegrationFlags, StoreError> {
        let row = self
            .client
            .query_opt(
                r#"
                SELECT email_enabled, telegram_enabled, discord_enabled, slack_enabled,
                       whatsapp_enabled
                FROM user_configs
                WHERE user_id = $1
                "#,
                &[&tenant_id],
            )
            .await?
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))?;

        Ok(IntegrationFlags {
            email: row.try_get(0)?,
            telegram: row.try_get(1)?,
            discord: row.try_get(2)?,
            slack: row.try_get(3)?,
            whatsapp: row.try_get(4)?,
        })
    }

    async fn list_channel_worker_metadata(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        let rows = self
            .client
            .query(
                r#"
                SELECT name, worker_type, exchange, queue, exchange_type, binding_key
                FROM worker_meta
                WHERE worker_type <> 'master'
                ORDER BY id
                "#,
                &[],
            )
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(entry) = registry_entry(row)? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    async fn register_channel_worker(&self, entry: &RegistryEntry) -> Result<(), StoreError> {
        let notification_type = entry.role.as_str();

        self.client
            .execute(
                r#"
                INSERT INTO worker_meta
                    (name, worker_type, exchange, queue, exchange_type, binding_key,
                     notification_type)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (name) DO UPDATE SET
                    worker_type = EXCLUDED.worker_type,
                    exchange = EXCLUDED.exchange,
                    queue = EXCLUDED.queue,
                    exchange_type = EXCLUDED.exchange_type,
                    binding_key = EXCLUDED.binding_key,
                    notification_type = EXCLUDED.notification_type
                "#,
                &[
                    &entry.name,
                    &notification_type,
                    &entry.exchange_name,
                    &entry.queue_name,
                    &entry.exchange_type,
                    &entry.binding_key,
                    &notification_type,
                ],
            )
            .await?;

        info!(worker = %entry.name, queue = %entry.queue_name, "Worker metadata registered");

        Ok(())
    }

    async fn delivery_targets(
        &self,
        tenant_config_id: i64,
        account_id: Option<&str>,
        event_type: EventType,
        channel: ChannelType,
    ) -> Result<Vec<DeliveryTarget>, StoreError> {
        match channel {
            ChannelType::Email => {
                self.email_targets(tenant_config_id, account_id, event_type)
                    .await
            }
            other if other.is_bot_channel() => {
                self.bot_targets(tenant_config_id, event_type, other).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl LogSink for DatabaseClient {
    async fn record_delivery(&self, log: CreateDeliveryLog) -> Result<(), StoreError> {
        let status = log.status.to_string();

        self.client
            .execute(
                r#"
                INSERT INTO delivery_logs (
                    user_config,
                    account_id,
                    event_type,
                    notification_type,
                    status,
                    error_message,
                    req_meta
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
                &[
                    &log.tenant_config_id,
                    &log.account_id,
                    &log.event_type.as_str(),
                    &log.channel.as_str(),
                    &status,
                    &log.error_message,
                    &log.request_meta,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    tenant_config_id = %log.tenant_config_id,
                    "Failed to write delivery log to database"
                );
                StoreError::from(e)
            })?;

        debug!(
            tenant_config_id = %log.tenant_config_id,
            channel = %log.channel,
            status = %status,
            "Delivery log written to database"
        );

        Ok(())
    }
}

#[async_trait]
impl PreferenceWriter for DatabaseClient {
    async fn create_default_preference(
        &self,
        preference: &DefaultPreference,
    ) -> Result<i64, StoreError> {
        let channel = preference.channel.as_str();
        let event_type = preference.event_type.as_str();

        let existing = self
            .client
            .query_opt(
                r#"
                SELECT id FROM notification_configs
                WHERE user_config = $1 AND event_type = $2 AND notification_type = $3
                ORDER BY id
                LIMIT 1
                "#,
                &[&preference.tenant_config_id, &event_type, &channel],
            )
            .await?;

        if let Some(row) = existing {
            return Ok(row.try_get(0)?);
        }

        let defaults = self
            .client
            .query_opt(
                r#"
                SELECT message_template, subject FROM default_configs
                WHERE event_type = $1 AND notification_type = $2
                "#,
                &[&event_type, &channel],
            )
            .await?;

        let (message_template, subject) = match defaults {
            Some(row) => {
                let template: String = row.try_get(0)?;
                let subject: String = row.try_get(1)?;
                (template.replace('\n', "\\n"), subject)
            }
            None => (String::new(), String::new()),
        };

        let row = self
            .client
            .query_one(
                r#"
                INSERT INTO notification_configs
                    (user_config, event_type, notification_type, enabled, message_template, subject)
                VALUES ($1, $2, $3, TRUE, $4, $5)
                RETURNING id
                "#,
                &[
                    &preference.tenant_config_id,
                    &event_type,
                    &channel,
                    &message_template,
                    &subject,
                ],
            )
            .await?;

        Ok(row.try_get(0)?)
    }

    async fn register_delivery_rule(
        &self,
        bot_config_id: i64,
        preference_id: i64,
    ) -> Result<(), StoreError> {
        self.client
            .execute(
                r#"
                INSERT INTO bot_events_rules (bot_config_id, notification_config_id)
                VALUES ($1, $2)
                ON CONFLICT (bot_config_id, notification_config_id) DO NOTHING
                "#,
                &[&bot_config_id, &preference_id],
            )
            .await?;

        Ok(())
    }
}
