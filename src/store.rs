//! Contracts for the collaborators the routing core reads from and writes to.
//!
//! Postgres implementations live in `clients::database`; the task-state backend in
//! `clients::redis`. Anything crossing these traits is already typed: unknown channel or
//! event strings are rejected by the implementation, never passed inward.

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{
        channel::{ChannelType, IntegrationFlags},
        delivery::{CreateDeliveryLog, DeliveryTarget},
        event::EventType,
        preference::{DefaultPreference, PreferenceRow, TenantScope},
        status::TaskState,
    },
    registry::RegistryEntry,
};

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The tenant owning `account_id`. Unknown accounts are `NotFound`.
    async fn resolve_tenant_for_account(&self, account_id: &str)
    -> Result<TenantScope, StoreError>;

    /// Tenant-only scope, used when no account is involved.
    async fn resolve_tenant(&self, tenant_id: &str) -> Result<TenantScope, StoreError>;

    /// Enabled preference rows for the event, in store order. May contain several rows
    /// for one channel type.
    async fn get_enabled_channels(
        &self,
        tenant_config_id: i64,
        account_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<PreferenceRow>, StoreError>;

    async fn is_channel_blocked_for_account(
        &self,
        account_config_id: i64,
        preference_id: i64,
    ) -> Result<bool, StoreError>;

    async fn get_integration_flags(&self, tenant_id: &str)
    -> Result<IntegrationFlags, StoreError>;

    /// Startup only.
    async fn list_channel_worker_metadata(&self) -> Result<Vec<RegistryEntry>, StoreError>;

    /// Announces a running worker so the master can discover it on its next start.
    async fn register_channel_worker(&self, entry: &RegistryEntry) -> Result<(), StoreError>;

    async fn delivery_targets(
        &self,
        tenant_config_id: i64,
        account_id: Option<&str>,
        event_type: EventType,
        channel: ChannelType,
    ) -> Result<Vec<DeliveryTarget>, StoreError>;
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record_delivery(&self, log: CreateDeliveryLog) -> Result<(), StoreError>;
}

/// Writes used when a tenant connects a channel. Each step is explicit so callers see
/// the dependency between the preference row and the rule that points at it.
#[async_trait]
pub trait PreferenceWriter: Send + Sync {
    /// Returns the id of the created (or already existing) row.
    async fn create_default_preference(
        &self,
        preference: &DefaultPreference,
    ) -> Result<i64, StoreError>;

    async fn register_delivery_rule(
        &self,
        bot_config_id: i64,
        preference_id: i64,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError>;

    async fn set_state(&self, task_id: &str, state: TaskState) -> Result<(), StoreError>;
}
