use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    dispatch::{BrokerConnector, TaskPublisher},
    error::StoreError,
    models::channel::ChannelType,
    store::ConfigStore,
};

/// Which queue a worker process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WorkerRole {
    Master,
    Channel(ChannelType),
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Master => "master",
            WorkerRole::Channel(channel) => channel.as_str(),
        }
    }

    pub fn channel(&self) -> Option<ChannelType> {
        match self {
            WorkerRole::Master => None,
            WorkerRole::Channel(channel) => Some(*channel),
        }
    }
}

impl Display for WorkerRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("master") {
            return Ok(WorkerRole::Master);
        }

        s.parse().map(WorkerRole::Channel)
    }
}

impl TryFrom<String> for WorkerRole {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerRole> for String {
    fn from(role: WorkerRole) -> Self {
        role.as_str().to_string()
    }
}

/// Broker binding needed to reach the workers of one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub role: WorkerRole,
    pub name: String,
    pub queue_name: String,
    pub exchange_name: String,
    pub exchange_type: String,
    pub binding_key: String,
}

impl RegistryEntry {
    /// An entry that names no exchange or binding cannot be published to.
    pub fn is_routable(&self) -> bool {
        !self.exchange_name.trim().is_empty() && !self.binding_key.trim().is_empty()
    }
}

#[derive(Clone)]
pub struct DispatchTarget {
    pub entry: RegistryEntry,
    pub publisher: Option<Arc<dyn TaskPublisher>>,
}

/// Channel type to dispatch target table, populated before the engine starts and read-only
/// afterwards. Share it behind an `Arc`; there is no way to register through one.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    master: Option<DispatchTarget>,
    channels: HashMap<ChannelType, DispatchTarget>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write for a role wins.
    pub fn register(&mut self, entry: RegistryEntry, publisher: Option<Arc<dyn TaskPublisher>>) {
        info!(
            role = %entry.role,
            worker = %entry.name,
            queue = %entry.queue_name,
            binding_key = %entry.binding_key,
            configured = publisher.is_some(),
            "Registering dispatch target"
        );

        let target = DispatchTarget { entry, publisher };

        let replaced = match target.entry.role {
            WorkerRole::Master => self.master.replace(target).is_some(),
            WorkerRole::Channel(channel) => self.channels.insert(channel, target).is_some(),
        };

        if replaced {
            warn!("Replaced an earlier registration for the same role");
        }
    }

    pub fn lookup(&self, channel: ChannelType) -> Option<&DispatchTarget> {
        self.channels.get(&channel)
    }

    pub fn master(&self) -> Option<&DispatchTarget> {
        self.master.as_ref()
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelType> + '_ {
        self.channels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len() + usize::from(self.master.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the registry from persisted worker metadata plus the master entry. Failing
    /// to read the metadata is fatal: a partial table would drop notifications silently.
    pub async fn bootstrap(
        store: &dyn ConfigStore,
        connector: &dyn BrokerConnector,
        master_entry: RegistryEntry,
    ) -> Result<Self, Error> {
        let entries = store
            .list_channel_worker_metadata()
            .await
            .context("Failed to load channel worker metadata")?;

        info!(count = entries.len(), "Loaded channel worker metadata");

        let mut registry = Self::new();

        for entry in std::iter::once(master_entry).chain(entries) {
            let publisher = if entry.is_routable() {
                let publisher = connector.publisher_for(&entry).await.with_context(|| {
                    format!("Failed to open broker handle for worker {}", entry.name)
                })?;
                Some(publisher)
            } else {
                warn!(
                    role = %entry.role,
                    worker = %entry.name,
                    "Worker metadata has no exchange or binding key, dispatch will fail"
                );
                None
            };

            registry.register(entry, publisher);
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: WorkerRole, queue: &str) -> RegistryEntry {
        RegistryEntry {
            role,
            name: queue.to_string(),
            queue_name: queue.to_string(),
            exchange_name: "notification_exchange".to_string(),
            exchange_type: "direct".to_string(),
            binding_key: queue.to_string(),
        }
    }

    #[test]
    fn parses_roles_from_store_strings() {
        assert_eq!("master".parse::<WorkerRole>().unwrap(), WorkerRole::Master);
        assert_eq!(
            " Telegram ".parse::<WorkerRole>().unwrap(),
            WorkerRole::Channel(ChannelType::Telegram)
        );
        assert!("pager".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ChannelRegistry::new();
        registry.register(entry(WorkerRole::Channel(ChannelType::Email), "nt-email"), None);
        registry.register(
            entry(WorkerRole::Channel(ChannelType::Email), "nt-email-2"),
            None,
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup(ChannelType::Email).unwrap().entry.queue_name,
            "nt-email-2"
        );
        assert!(registry.lookup(ChannelType::Discord).is_none());
    }

    #[test]
    fn master_is_kept_apart_from_channels() {
        let mut registry = ChannelRegistry::new();
        registry.register(entry(WorkerRole::Master, "nt-master"), None);

        assert!(registry.master().is_some());
        assert_eq!(registry.channels().count(), 0);
    }

    #[test]
    fn blank_binding_is_not_routable() {
        let mut e = entry(WorkerRole::Channel(ChannelType::Slack), "nt-slack");
        assert!(e.is_routable());
        e.binding_key = " ".to_string();
        assert!(!e.is_routable());
    }
}
