use std::{collections::HashSet, sync::Arc};

use tracing::{debug, warn};

use crate::{
    error::RoutingError,
    models::{
        channel::ChannelType,
        event::EventType,
        preference::{ChannelPreference, PreferenceRow, TenantScope},
    },
    store::ConfigStore,
};

/// Read-only view over the configuration store that turns preference rows into the
/// channels an event may go to.
#[derive(Clone)]
pub struct PreferenceResolver {
    store: Arc<dyn ConfigStore>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Enabled channel types for an event, first occurrence per type, account blocks
    /// applied. An empty `account_id` on `ACCOUNT_DELETED` resolves from integration
    /// flags alone.
    pub async fn resolve_enabled_channels(
        &self,
        tenant_id: &str,
        account_id: &str,
        event_type: EventType,
    ) -> Result<Vec<ChannelType>, RoutingError> {
        if account_id.is_empty() && event_type == EventType::AccountDeleted {
            let (_, channels) = self.resolve_tenant_wide(tenant_id).await?;
            return Ok(channels);
        }

        let scope = self.store.resolve_tenant_for_account(account_id).await?;
        if scope.tenant_id != tenant_id && !tenant_id.is_empty() {
            warn!(
                tenant_id,
                account_id,
                owner = %scope.tenant_id,
                "Account belongs to a different tenant than the event claims"
            );
        }

        let rows = self.resolve_rows(&scope, Some(account_id), event_type).await?;

        Ok(rows.into_iter().map(|row| row.channel).collect())
    }

    /// Tenant-wide deletions: the tenant must exist and its integration flags alone pick
    /// the channels. Preference rows and account blocks are not read.
    pub async fn resolve_tenant_wide(
        &self,
        tenant_id: &str,
    ) -> Result<(TenantScope, Vec<ChannelType>), RoutingError> {
        let scope = self.store.resolve_tenant(tenant_id).await?;
        let flags = self.store.get_integration_flags(&scope.tenant_id).await?;

        Ok((scope, flags.enabled_channels()))
    }

    /// Preference rows surviving account blocks, deduplicated by channel type.
    pub async fn resolve_rows(
        &self,
        scope: &TenantScope,
        account_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<PreferenceRow>, RoutingError> {
        let rows = self
            .store
            .get_enabled_channels(scope.tenant_config_id, account_id, event_type)
            .await?;

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(rows.len());

        for row in rows {
            if let Some(account_config_id) = scope.account_config_id {
                if self
                    .store
                    .is_channel_blocked_for_account(account_config_id, row.id)
                    .await?
                {
                    debug!(
                        tenant_id = %scope.tenant_id,
                        channel = %row.channel,
                        preference_id = row.id,
                        "Channel blocked for account"
                    );
                    continue;
                }
            }

            if !seen.insert(row.channel) {
                debug!(
                    tenant_id = %scope.tenant_id,
                    channel = %row.channel,
                    preference_id = row.id,
                    "Ignoring duplicate preference row"
                );
                continue;
            }

            resolved.push(row);
        }

        Ok(resolved)
    }

    /// The per-channel decision for one (tenant, account) pair, for inspection.
    pub async fn channel_preferences(
        &self,
        account_id: &str,
        event_type: EventType,
    ) -> Result<Vec<ChannelPreference>, RoutingError> {
        let scope = self.store.resolve_tenant_for_account(account_id).await?;
        let enabled = self
            .resolve_rows(&scope, Some(account_id), event_type)
            .await?;

        Ok(ChannelType::ALL
            .into_iter()
            .map(|channel| {
                let row = enabled.iter().find(|row| row.channel == channel);
                ChannelPreference {
                    tenant_id: scope.tenant_id.clone(),
                    account_id: Some(account_id.to_string()),
                    channel,
                    preference_id: row.map(|row| row.id).unwrap_or_default(),
                    enabled: row.is_some(),
                }
            })
            .collect())
    }
}
