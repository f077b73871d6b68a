use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::DispatchError, models::task::DispatchTask, registry::DispatchTarget,
    registry::RegistryEntry,
};

/// A broker handle able to enqueue tasks for one or more registry entries.
/// Implementations must tolerate concurrent publishes.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish(&self, entry: &RegistryEntry, task: &DispatchTask)
    -> Result<(), DispatchError>;

    /// Enqueue `task` so that it reaches `entry` only after `delay`.
    async fn publish_delayed(
        &self,
        entry: &RegistryEntry,
        task: &DispatchTask,
        delay: Duration,
    ) -> Result<(), DispatchError>;
}

/// Opens broker handles while the registry is being built.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn publisher_for(
        &self,
        entry: &RegistryEntry,
    ) -> Result<Arc<dyn TaskPublisher>, DispatchError>;
}

/// One publish attempt. Retrying is left to the consumer side through the task's own
/// retry budget.
pub async fn publish(target: &DispatchTarget, task: &DispatchTask) -> Result<(), DispatchError> {
    let Some(publisher) = target.publisher.as_ref() else {
        warn!(
            role = %target.entry.role,
            worker = %target.entry.name,
            task_id = %task.uuid,
            "Dispatch target has no broker handle"
        );
        return Err(DispatchError::NotConfigured(target.entry.role.to_string()));
    };

    publisher.publish(&target.entry, task).await?;

    debug!(
        task_id = %task.uuid,
        task_name = %task.task_name,
        routing_key = %task.routing_key,
        exchange = %target.entry.exchange_name,
        "Task published"
    );

    Ok(())
}
