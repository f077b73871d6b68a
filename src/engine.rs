use std::{collections::HashSet, sync::Arc};

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::{
    dispatch,
    error::{ChannelSkip, RoutingError, StoreError},
    models::{
        channel::{ChannelType, IntegrationFlags},
        event::Event,
        preference::{PreferenceRow, TenantScope},
        task::DispatchTask,
    },
    registry::{ChannelRegistry, DispatchTarget},
    resolver::PreferenceResolver,
    store::ConfigStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedTask {
    pub channel: ChannelType,
    pub task_id: String,
}

/// What happened to each candidate channel. Only resolution failures are errors; anything
/// recorded here has already been logged.
#[derive(Debug, Default)]
pub struct RoutingReport {
    pub dispatched: Vec<DispatchedTask>,
    pub skipped: Vec<ChannelSkip>,
}

impl RoutingReport {
    pub fn dispatched_channels(&self) -> Vec<ChannelType> {
        self.dispatched.iter().map(|d| d.channel).collect()
    }
}

/// Turns one event into at most one delivery task per channel type.
#[derive(Clone)]
pub struct RoutingEngine {
    store: Arc<dyn ConfigStore>,
    resolver: PreferenceResolver,
    registry: Arc<ChannelRegistry>,
}

struct PendingDispatch {
    channel: ChannelType,
    target: DispatchTarget,
    task: DispatchTask,
}

impl RoutingEngine {
    pub fn new(store: Arc<dyn ConfigStore>, registry: Arc<ChannelRegistry>) -> Self {
        Self {
            resolver: PreferenceResolver::new(store.clone()),
            store,
            registry,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub async fn route(&self, event: &Event) -> Result<RoutingReport, RoutingError> {
        let mut report = RoutingReport::default();

        let pending = if event.is_tenant_wide() {
            self.plan_tenant_wide(event, &mut report).await?
        } else {
            self.plan_for_account(event, &mut report).await?
        };

        let outcomes = join_all(pending.into_iter().map(|p| async move {
            let result = dispatch::publish(&p.target, &p.task).await;
            (p, result)
        }))
        .await;

        for (pending, result) in outcomes {
            match result {
                Ok(()) => {
                    info!(
                        tenant_id = %event.tenant_id,
                        account_id = event.account().unwrap_or_default(),
                        event_type = %event.event_type,
                        channel = %pending.channel,
                        task_id = %pending.task.uuid,
                        "Dispatched notification task"
                    );
                    report.dispatched.push(DispatchedTask {
                        channel: pending.channel,
                        task_id: pending.task.uuid,
                    });
                }
                Err(e) => {
                    error!(
                        tenant_id = %event.tenant_id,
                        event_type = %event.event_type,
                        channel = %pending.channel,
                        error = %e,
                        "Failed to dispatch notification task"
                    );
                    report.skipped.push(ChannelSkip::Publish {
                        channel: pending.channel,
                        source: e,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Account deletion without an account: integration flags decide, preferences and
    /// account blocks are not consulted.
    async fn plan_tenant_wide(
        &self,
        event: &Event,
        report: &mut RoutingReport,
    ) -> Result<Vec<PendingDispatch>, RoutingError> {
        let (scope, channels) = self.resolver.resolve_tenant_wide(&event.tenant_id).await?;

        debug!(
            tenant_id = %scope.tenant_id,
            event_type = %event.event_type,
            candidates = channels.len(),
            "Routing tenant-wide event from integration flags"
        );

        let data = encode_payload(event);
        let mut pending = Vec::new();

        for channel in channels {
            let Some(target) = self.lookup(channel, event, report) else {
                continue;
            };

            let task = DispatchTask::send_notification(
                channel,
                &target.entry.binding_key,
                &scope.tenant_config_id.to_string(),
                "",
                event.event_type,
                data.clone(),
            );

            pending.push(PendingDispatch {
                channel,
                target,
                task,
            });
        }

        Ok(pending)
    }

    async fn plan_for_account(
        &self,
        event: &Event,
        report: &mut RoutingReport,
    ) -> Result<Vec<PendingDispatch>, RoutingError> {
        let account_id = event
            .account()
            .ok_or_else(|| RoutingError::NotFound {
                entity: "account",
                id: String::new(),
            })?;

        let scope = self.store.resolve_tenant_for_account(account_id).await?;
        let rows = self
            .resolver
            .resolve_rows(&scope, Some(account_id), event.event_type)
            .await?;

        debug!(
            tenant_id = %scope.tenant_id,
            account_id,
            event_type = %event.event_type,
            candidates = rows.len(),
            "Resolved enabled channels"
        );

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let flags = match self.store.get_integration_flags(&scope.tenant_id).await {
            Ok(flags) => Some(flags),
            Err(e) => {
                warn!(
                    tenant_id = %scope.tenant_id,
                    error = %e,
                    "Could not load integration flags, gating every channel"
                );
                None
            }
        };

        let data = encode_payload(event);
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for row in rows {
            if !seen.insert(row.channel) {
                continue;
            }

            let Some(target) = self.lookup(row.channel, event, report) else {
                continue;
            };

            match self.should_send(&scope, &row, flags.as_ref()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        tenant_id = %scope.tenant_id,
                        account_id,
                        channel = %row.channel,
                        preference_id = row.id,
                        "Channel gated"
                    );
                    report.skipped.push(ChannelSkip::Gated(row.channel));
                    continue;
                }
                Err(e) => {
                    warn!(
                        tenant_id = %scope.tenant_id,
                        account_id,
                        channel = %row.channel,
                        error = %e,
                        "Gate check failed, skipping channel"
                    );
                    report.skipped.push(ChannelSkip::Gated(row.channel));
                    continue;
                }
            }

            let task = DispatchTask::send_notification(
                row.channel,
                &target.entry.binding_key,
                &scope.tenant_config_id.to_string(),
                account_id,
                event.event_type,
                data.clone(),
            );

            pending.push(PendingDispatch {
                channel: row.channel,
                target,
                task,
            });
        }

        Ok(pending)
    }

    /// Not blocked for the account and the tenant's integration still switched on. Both
    /// can change independently of the preference rows.
    async fn should_send(
        &self,
        scope: &TenantScope,
        row: &PreferenceRow,
        flags: Option<&IntegrationFlags>,
    ) -> Result<bool, StoreError> {
        let Some(flags) = flags else {
            return Ok(false);
        };

        if !flags.is_enabled(row.channel) {
            return Ok(false);
        }

        match scope.account_config_id {
            Some(account_config_id) => Ok(!self
                .store
                .is_channel_blocked_for_account(account_config_id, row.id)
                .await?),
            None => Ok(true),
        }
    }

    fn lookup(
        &self,
        channel: ChannelType,
        event: &Event,
        report: &mut RoutingReport,
    ) -> Option<DispatchTarget> {
        match self.registry.lookup(channel) {
            Some(target) => Some(target.clone()),
            None => {
                warn!(
                    tenant_id = %event.tenant_id,
                    event_type = %event.event_type,
                    channel = %channel,
                    "No worker registered for channel, skipping"
                );
                report.skipped.push(ChannelSkip::RegistryMiss(channel));
                None
            }
        }
    }
}

fn encode_payload(event: &Event) -> Vec<u8> {
    serde_json::to_vec(&event.payload).unwrap_or_default()
}
