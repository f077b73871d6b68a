use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, TaskDecodeError, TaskError},
    models::{
        channel::ChannelType,
        delivery::{CreateDeliveryLog, DeliveryTarget, RenderedMessage},
        status::DeliveryStatus,
        task::{DispatchTask, NotificationArgs},
    },
    store::{ConfigStore, LogSink},
    template,
    worker::TaskHandler,
};

/// Sends one rendered message to one target over a provider API.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    fn channel(&self) -> ChannelType;

    async fn deliver(
        &self,
        target: &DeliveryTarget,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError>;
}

/// Channel-queue handler: renders the event for every configured target and records one
/// log entry per attempt.
pub struct DeliveryTaskHandler {
    store: Arc<dyn ConfigStore>,
    logs: Arc<dyn LogSink>,
    adapter: Arc<dyn DeliveryAdapter>,
}

impl DeliveryTaskHandler {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        logs: Arc<dyn LogSink>,
        adapter: Arc<dyn DeliveryAdapter>,
    ) -> Self {
        Self {
            store,
            logs,
            adapter,
        }
    }

    pub fn channel(&self) -> ChannelType {
        self.adapter.channel()
    }

    fn log_entry(&self, args: &NotificationArgs, status: DeliveryStatus) -> CreateDeliveryLog {
        CreateDeliveryLog::new(
            args.subject.clone(),
            args.account_id.clone(),
            args.event_type,
            self.channel(),
            status,
        )
    }

    async fn write_log(&self, task: &DispatchTask, log: CreateDeliveryLog) {
        if let Err(log_err) = self.logs.record_delivery(log).await {
            warn!(error = %log_err, task_id = %task.uuid, "Failed to write delivery log");
        }
    }

    async fn deliver_all(
        &self,
        task: &DispatchTask,
        args: &NotificationArgs,
    ) -> Result<(), TaskError> {
        let channel = self.channel();
        let data = args.data_map()?;

        let tenant_config_id: i64 = args.subject.parse().map_err(|_| {
            TaskDecodeError::Data(format!("tenant config id '{}' is not numeric", args.subject))
        })?;

        let targets = self
            .store
            .delivery_targets(tenant_config_id, args.account(), args.event_type, channel)
            .await?;

        if targets.is_empty() {
            info!(
                task_id = %task.uuid,
                tenant_config_id,
                account_id = %args.account_id,
                event_type = %args.event_type,
                channel = %channel,
                "No delivery targets configured"
            );
            return Ok(());
        }

        let mut delivered = 0usize;
        let mut last_error = None;

        for target in &targets {
            let message = template::render(channel, args.event_type, target, &data);
            let result = self.adapter.deliver(target, &message).await;

            let meta = json!({
                "recipient": target.recipient,
                "subject": message.subject,
                "message": message.body,
            });

            let log = match &result {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        task_id = %task.uuid,
                        channel = %channel,
                        recipient = %target.recipient,
                        "Notification delivered"
                    );
                    self.log_entry(args, DeliveryStatus::Success)
                }
                Err(e) => {
                    error!(
                        task_id = %task.uuid,
                        channel = %channel,
                        recipient = %target.recipient,
                        error = %e,
                        "Notification delivery failed"
                    );
                    self.log_entry(args, DeliveryStatus::Failed)
                        .with_error(e.to_string())
                }
            }
            .with_request_meta(meta);

            self.write_log(task, log).await;

            if let Err(e) = result {
                last_error = Some(e);
            }
        }

        match (delivered, last_error) {
            (0, Some(e)) => Err(TaskError::Delivery(e.to_string())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TaskHandler for DeliveryTaskHandler {
    fn task_name(&self) -> String {
        self.channel().task_name()
    }

    async fn handle(&self, task: &DispatchTask) -> Result<(), TaskError> {
        let args = NotificationArgs::from_task(task)?;

        match self.deliver_all(task, &args).await {
            Err(e) if !matches!(e, TaskError::Delivery(_)) => {
                // Per-target failures were logged in the delivery loop.
                error!(
                    task_id = %task.uuid,
                    channel = %self.channel(),
                    error = %e,
                    "Delivery aborted before reaching any target"
                );
                let log = self
                    .log_entry(&args, DeliveryStatus::Failed)
                    .with_error(e.to_string());
                self.write_log(task, log).await;
                Err(e)
            }
            outcome => outcome,
        }
    }
}
