#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use notification_router::{
    dispatch::{BrokerConnector, TaskPublisher},
    error::{DeliveryError, DispatchError, StoreError, TaskError},
    models::{
        channel::{ChannelType, IntegrationFlags},
        delivery::{CreateDeliveryLog, DeliveryTarget, RenderedMessage},
        event::EventType,
        preference::{DefaultPreference, PreferenceRow, TenantScope},
        status::TaskState,
        task::DispatchTask,
    },
    registry::{ChannelRegistry, RegistryEntry, WorkerRole},
    store::{ConfigStore, LogSink, PreferenceWriter, TaskStateStore},
    worker::{TaskHandler, deliver::DeliveryAdapter},
};
use tokio::sync::Barrier;

pub fn entry(role: WorkerRole, queue: &str) -> RegistryEntry {
    RegistryEntry {
        role,
        name: queue.to_string(),
        queue_name: queue.to_string(),
        exchange_name: "notification_exchange".to_string(),
        exchange_type: "direct".to_string(),
        binding_key: queue.to_string(),
    }
}

pub fn channel_entry(channel: ChannelType) -> RegistryEntry {
    entry(WorkerRole::Channel(channel), &format!("nt-{}", channel))
}

pub fn flags(channels: &[ChannelType]) -> IntegrationFlags {
    IntegrationFlags {
        email: channels.contains(&ChannelType::Email),
        telegram: channels.contains(&ChannelType::Telegram),
        discord: channels.contains(&ChannelType::Discord),
        slack: channels.contains(&ChannelType::Slack),
        whatsapp: channels.contains(&ChannelType::Whatsapp),
    }
}

/// Registry with one routable entry per channel, all sharing `publisher`.
pub fn registry_for(
    channels: &[ChannelType],
    publisher: Arc<RecordingPublisher>,
) -> Arc<ChannelRegistry> {
    let mut registry = ChannelRegistry::new();
    for channel in channels {
        let publisher: Arc<dyn TaskPublisher> = publisher.clone();
        registry.register(channel_entry(*channel), Some(publisher));
    }
    Arc::new(registry)
}

#[derive(Default)]
pub struct StoreCalls {
    pub tenant_lookups: AtomicUsize,
    pub preference_lookups: AtomicUsize,
    pub block_checks: AtomicUsize,
    pub flag_lookups: AtomicUsize,
}

impl StoreCalls {
    pub fn preference_lookups(&self) -> usize {
        self.preference_lookups.load(Ordering::SeqCst)
    }

    pub fn block_checks(&self) -> usize {
        self.block_checks.load(Ordering::SeqCst)
    }

    pub fn flag_lookups(&self) -> usize {
        self.flag_lookups.load(Ordering::SeqCst)
    }
}

/// In-memory configuration store.
#[derive(Default)]
pub struct FakeStore {
    accounts: HashMap<String, TenantScope>,
    tenants: HashMap<String, TenantScope>,
    preferences: HashMap<(i64, EventType), Vec<PreferenceRow>>,
    blocks: HashSet<(i64, i64)>,
    flags: HashMap<String, IntegrationFlags>,
    workers: Vec<RegistryEntry>,
    targets: HashMap<ChannelType, Vec<DeliveryTarget>>,
    fail_metadata: bool,
    fail_preferences: bool,
    fail_flags: bool,
    fail_targets: bool,
    pub calls: StoreCalls,
    pub registered: Mutex<Vec<RegistryEntry>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant_id: &str, tenant_config_id: i64) -> Self {
        self.tenants.insert(
            tenant_id.to_string(),
            TenantScope {
                tenant_id: tenant_id.to_string(),
                tenant_config_id,
                account_config_id: None,
            },
        );
        self
    }

    pub fn with_account(
        mut self,
        account_id: &str,
        tenant_id: &str,
        tenant_config_id: i64,
        account_config_id: i64,
    ) -> Self {
        self.accounts.insert(
            account_id.to_string(),
            TenantScope {
                tenant_id: tenant_id.to_string(),
                tenant_config_id,
                account_config_id: Some(account_config_id),
            },
        );
        self.with_tenant(tenant_id, tenant_config_id)
    }

    pub fn with_preference(
        mut self,
        tenant_config_id: i64,
        event_type: EventType,
        preference_id: i64,
        channel: ChannelType,
    ) -> Self {
        self.preferences
            .entry((tenant_config_id, event_type))
            .or_default()
            .push(PreferenceRow {
                id: preference_id,
                channel,
            });
        self
    }

    pub fn with_block(mut self, account_config_id: i64, preference_id: i64) -> Self {
        self.blocks.insert((account_config_id, preference_id));
        self
    }

    pub fn with_flags(mut self, tenant_id: &str, channels: &[ChannelType]) -> Self {
        self.flags.insert(tenant_id.to_string(), flags(channels));
        self
    }

    pub fn with_worker(mut self, entry: RegistryEntry) -> Self {
        self.workers.push(entry);
        self
    }

    pub fn with_targets(mut self, channel: ChannelType, targets: Vec<DeliveryTarget>) -> Self {
        self.targets.insert(channel, targets);
        self
    }

    pub fn failing_metadata(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    pub fn failing_preferences(mut self) -> Self {
        self.fail_preferences = true;
        self
    }

    pub fn failing_flags(mut self) -> Self {
        self.fail_flags = true;
        self
    }

    pub fn failing_targets(mut self) -> Self {
        self.fail_targets = true;
        self
    }
}

#[async_trait]
impl ConfigStore for FakeStore {
    async fn resolve_tenant_for_account(
        &self,
        account_id: &str,
    ) -> Result<TenantScope, StoreError> {
        self.calls.tenant_lookups.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", account_id))
    }

    async fn resolve_tenant(&self, tenant_id: &str) -> Result<TenantScope, StoreError> {
        self.calls.tenant_lookups.fetch_add(1, Ordering::SeqCst);
        self.tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))
    }

    async fn get_enabled_channels(
        &self,
        tenant_config_id: i64,
        _account_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<PreferenceRow>, StoreError> {
        self.calls.preference_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_preferences {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(self
            .preferences
            .get(&(tenant_config_id, event_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn is_channel_blocked_for_account(
        &self,
        account_config_id: i64,
        preference_id: i64,
    ) -> Result<bool, StoreError> {
        self.calls.block_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.contains(&(account_config_id, preference_id)))
    }

    async fn get_integration_flags(
        &self,
        tenant_id: &str,
    ) -> Result<IntegrationFlags, StoreError> {
        self.calls.flag_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_flags {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(self.flags.get(tenant_id).copied().unwrap_or_default())
    }

    async fn list_channel_worker_metadata(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        if self.fail_metadata {
            return Err(StoreError::Backend("metadata table unavailable".to_string()));
        }
        Ok(self.workers.clone())
    }

    async fn register_channel_worker(&self, entry: &RegistryEntry) -> Result<(), StoreError> {
        self.registered.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn delivery_targets(
        &self,
        _tenant_config_id: i64,
        _account_id: Option<&str>,
        _event_type: EventType,
        channel: ChannelType,
    ) -> Result<Vec<DeliveryTarget>, StoreError> {
        if self.fail_targets {
            return Err(StoreError::Backend("down".to_string()));
        }
        Ok(self.targets.get(&channel).cloned().unwrap_or_default())
    }
}

/// Publisher that records every task instead of talking to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(RegistryEntry, DispatchTask)>>,
    pub delayed: Mutex<Vec<(RegistryEntry, DispatchTask, Duration)>>,
    failing_queues: HashSet<String>,
    fail_delayed: bool,
    barrier: Option<Arc<Barrier>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, queue: &str) -> Self {
        self.failing_queues.insert(queue.to_string());
        self
    }

    pub fn failing_delayed(mut self) -> Self {
        self.fail_delayed = true;
        self
    }

    /// Every publish waits until `parties` publishes are in flight at once.
    pub fn rendezvous(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn tasks(&self) -> Vec<DispatchTask> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, task)| task.clone())
            .collect()
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks().into_iter().map(|t| t.task_name).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TaskPublisher for RecordingPublisher {
    async fn publish(
        &self,
        entry: &RegistryEntry,
        task: &DispatchTask,
    ) -> Result<(), DispatchError> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        if self.failing_queues.contains(&entry.queue_name) {
            return Err(DispatchError::PublishFailure("connection reset".to_string()));
        }

        self.published
            .lock()
            .unwrap()
            .push((entry.clone(), task.clone()));
        Ok(())
    }

    async fn publish_delayed(
        &self,
        entry: &RegistryEntry,
        task: &DispatchTask,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        if self.fail_delayed {
            return Err(DispatchError::PublishFailure("channel closed".to_string()));
        }

        self.delayed
            .lock()
            .unwrap()
            .push((entry.clone(), task.clone(), delay));
        Ok(())
    }
}

/// Hands out the same recording publisher for every entry.
pub struct FakeConnector {
    pub publisher: Arc<RecordingPublisher>,
    pub opened: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(publisher: Arc<RecordingPublisher>) -> Self {
        Self {
            publisher,
            opened: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    async fn publisher_for(
        &self,
        entry: &RegistryEntry,
    ) -> Result<Arc<dyn TaskPublisher>, DispatchError> {
        self.opened.lock().unwrap().push(entry.queue_name.clone());
        let publisher: Arc<dyn TaskPublisher> = self.publisher.clone();
        Ok(publisher)
    }
}

#[derive(Default)]
pub struct FakeStateStore {
    states: Mutex<HashMap<String, TaskState>>,
    pub history: Mutex<Vec<(String, TaskState)>>,
}

impl FakeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(self, task_id: &str, state: TaskState) -> Self {
        self.states
            .lock()
            .unwrap()
            .insert(task_id.to_string(), state);
        self
    }

    pub fn current(&self, task_id: &str) -> Option<TaskState> {
        self.states.lock().unwrap().get(task_id).copied()
    }

    pub fn transitions(&self) -> Vec<TaskState> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .map(|(_, state)| *state)
            .collect()
    }
}

#[async_trait]
impl TaskStateStore for FakeStateStore {
    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        Ok(self.current(task_id))
    }

    async fn set_state(&self, task_id: &str, state: TaskState) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap()
            .insert(task_id.to_string(), state);
        self.history
            .lock()
            .unwrap()
            .push((task_id.to_string(), state));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLogSink {
    pub logs: Mutex<Vec<CreateDeliveryLog>>,
}

impl FakeLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CreateDeliveryLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for FakeLogSink {
    async fn record_delivery(&self, log: CreateDeliveryLog) -> Result<(), StoreError> {
        self.logs.lock().unwrap().push(log);
        Ok(())
    }
}

pub struct FakeAdapter {
    channel: ChannelType,
    failing_recipients: HashSet<String>,
    pub sent: Mutex<Vec<(DeliveryTarget, RenderedMessage)>>,
}

impl FakeAdapter {
    pub fn new(channel: ChannelType) -> Self {
        Self {
            channel,
            failing_recipients: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, recipient: &str) -> Self {
        self.failing_recipients.insert(recipient.to_string());
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryAdapter for FakeAdapter {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    async fn deliver(
        &self,
        target: &DeliveryTarget,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        if self.failing_recipients.contains(&target.recipient) {
            return Err(DeliveryError::Rejected {
                status: 502,
                body: "upstream unavailable".to_string(),
            });
        }

        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), message.clone()));
        Ok(())
    }
}

pub enum HandlerOutcome {
    Succeed,
    FailRetryable,
    FailPermanent,
}

pub struct FakeHandler {
    task_name: String,
    outcome: HandlerOutcome,
    pub calls: AtomicUsize,
}

impl FakeHandler {
    pub fn new(task_name: &str, outcome: HandlerOutcome) -> Self {
        Self {
            task_name: task_name.to_string(),
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FakeHandler {
    fn task_name(&self) -> String {
        self.task_name.clone()
    }

    async fn handle(&self, _task: &DispatchTask) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            HandlerOutcome::Succeed => Ok(()),
            HandlerOutcome::FailRetryable => {
                Err(TaskError::Delivery("smtp timeout".to_string()))
            }
            HandlerOutcome::FailPermanent => Err(TaskError::Routing(
                notification_router::error::RoutingError::NotFound {
                    entity: "account",
                    id: "ghost".to_string(),
                },
            )),
        }
    }
}

/// Records writes in call order so tests can check sequencing.
#[derive(Default)]
pub struct FakePreferenceWriter {
    next_id: AtomicUsize,
    pub writes: Mutex<Vec<String>>,
    pub preferences: Mutex<Vec<DefaultPreference>>,
    pub rules: Mutex<Vec<(i64, i64)>>,
}

impl FakePreferenceWriter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(100),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PreferenceWriter for FakePreferenceWriter {
    async fn create_default_preference(
        &self,
        preference: &DefaultPreference,
    ) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        self.preferences.lock().unwrap().push(preference.clone());
        self.writes
            .lock()
            .unwrap()
            .push(format!("preference:{}", id));
        Ok(id)
    }

    async fn register_delivery_rule(
        &self,
        bot_config_id: i64,
        preference_id: i64,
    ) -> Result<(), StoreError> {
        self.rules.lock().unwrap().push((bot_config_id, preference_id));
        self.writes
            .lock()
            .unwrap()
            .push(format!("rule:{}:{}", bot_config_id, preference_id));
        Ok(())
    }
}
