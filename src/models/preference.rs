use serde::{Deserialize, Serialize};

use crate::models::{channel::ChannelType, event::EventType};

/// An enabled tenant-level preference row for one event and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRow {
    pub id: i64,
    pub channel: ChannelType,
}

/// Resolved decision for one (tenant, account, channel) at dispatch time. Computed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub tenant_id: String,
    pub account_id: Option<String>,
    pub channel: ChannelType,
    pub preference_id: i64,
    pub enabled: bool,
}

/// Store identities of the tenant (and optionally the account) an event is routed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    /// External tenant id, used for integration flags.
    pub tenant_id: String,
    /// Store key of the tenant's configuration, carried to channel workers.
    pub tenant_config_id: i64,
    /// Store key of the account's configuration, used for block rules.
    pub account_config_id: Option<i64>,
}

/// Input to default provisioning: which events a newly connected channel starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPreference {
    pub tenant_config_id: i64,
    pub channel: ChannelType,
    pub event_type: EventType,
}
