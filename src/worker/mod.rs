//! Queue consumer harness shared by the master and channel workers.
//!
//! A worker pulls at most `prefetch` unacked tasks from its queue and runs at most
//! `concurrency` of them at once. Each task is acknowledged only after its handler has
//! finished, whether it succeeded, was rescheduled or ran out of attempts.

pub mod deliver;
pub mod route;

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Consumer,
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::TaskPublisher,
    error::{TaskDecodeError, TaskError},
    models::{status::TaskState, task::DispatchTask},
    registry::RegistryEntry,
    store::TaskStateStore,
};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The only task name this handler accepts.
    fn task_name(&self) -> String;

    async fn handle(&self, task: &DispatchTask) -> Result<(), TaskError>;
}

/// How a consumed message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, or failed for good. Removed from the queue.
    Ack,
    /// Could not be read as a task for this worker. Dropped without requeue.
    Reject,
    /// Failed with budget left; a delayed copy was published and the original acked.
    Retried,
    /// Already completed by an earlier delivery.
    Skipped,
}

pub struct ChannelWorker {
    entry: RegistryEntry,
    handler: Arc<dyn TaskHandler>,
    states: Arc<dyn TaskStateStore>,
    retry_publisher: Arc<dyn TaskPublisher>,
    concurrency: usize,
}

impl ChannelWorker {
    pub fn new(
        entry: RegistryEntry,
        handler: Arc<dyn TaskHandler>,
        states: Arc<dyn TaskStateStore>,
        retry_publisher: Arc<dyn TaskPublisher>,
        concurrency: usize,
    ) -> Self {
        Self {
            entry,
            handler,
            states,
            retry_publisher,
            concurrency: concurrency.max(1),
        }
    }

    pub fn entry(&self) -> &RegistryEntry {
        &self.entry
    }

    /// Decodes `payload` and checks it is the task this worker's handler runs.
    pub fn accept(&self, payload: &[u8]) -> Result<DispatchTask, TaskDecodeError> {
        let task = DispatchTask::decode(payload)?;

        if task.task_name != self.handler.task_name() {
            return Err(TaskDecodeError::UnexpectedTask(task.task_name));
        }

        Ok(task)
    }

    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let task = match self.accept(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(queue = %self.entry.queue_name, error = %e, "Rejecting task");
                return Disposition::Reject;
            }
        };

        match self.states.state(&task.uuid).await {
            Ok(Some(TaskState::Success)) => {
                info!(task_id = %task.uuid, "Task already completed, skipping");
                return Disposition::Skipped;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = %task.uuid, error = %e, "Could not read task state");
            }
        }

        self.record_state(&task, TaskState::Received).await;
        self.record_state(&task, TaskState::Started).await;

        debug!(
            task_id = %task.uuid,
            task_name = %task.task_name,
            retry_count = task.retry_count,
            "Processing task"
        );

        let err = match self.handler.handle(&task).await {
            Ok(()) => {
                self.record_state(&task, TaskState::Success).await;
                info!(task_id = %task.uuid, task_name = %task.task_name, "Task completed");
                return Disposition::Ack;
            }
            Err(e) => e,
        };

        if err.is_retryable() {
            if let Some(next) = task.next_attempt() {
                return self.schedule_retry(&task, next, &err).await;
            }
        }

        error!(
            task_id = %task.uuid,
            task_name = %task.task_name,
            error = %err,
            retryable = err.is_retryable(),
            "Task failed, dropping"
        );
        self.record_state(&task, TaskState::Failure).await;

        Disposition::Ack
    }

    async fn schedule_retry(
        &self,
        task: &DispatchTask,
        next: DispatchTask,
        cause: &TaskError,
    ) -> Disposition {
        let delay = Duration::from_secs(u64::from(task.retry_timeout_seconds));

        match self
            .retry_publisher
            .publish_delayed(&self.entry, &next, delay)
            .await
        {
            Ok(()) => {
                warn!(
                    task_id = %task.uuid,
                    error = %cause,
                    retries_left = next.retry_count,
                    delay_seconds = task.retry_timeout_seconds,
                    "Task failed, retry scheduled"
                );
                self.record_state(task, TaskState::Retry).await;
                Disposition::Retried
            }
            Err(e) => {
                error!(
                    task_id = %task.uuid,
                    error = %e,
                    "Failed to schedule retry, rejecting task"
                );
                self.record_state(task, TaskState::Failure).await;
                Disposition::Reject
            }
        }
    }

    async fn record_state(&self, task: &DispatchTask, state: TaskState) {
        if let Err(e) = self.states.set_state(&task.uuid, state).await {
            warn!(task_id = %task.uuid, state = %state, error = %e, "Failed to record task state");
        }
    }

    async fn settle(&self, delivery: Delivery) {
        if delivery.redelivered {
            debug!(queue = %self.entry.queue_name, "Received redelivered message");
        }

        let disposition = self.process(&delivery.data).await;

        let result = match disposition {
            Disposition::Reject => {
                delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
            _ => delivery.acker.ack(BasicAckOptions::default()).await,
        };

        if let Err(e) = result {
            error!(
                queue = %self.entry.queue_name,
                disposition = ?disposition,
                error = %e,
                "Failed to settle message"
            );
        }
    }

    /// Consumes until `shutdown` resolves or the broker closes the stream, then waits for
    /// in-flight tasks.
    pub async fn run<S>(self: Arc<Self>, mut consumer: Consumer, shutdown: S) -> Result<(), Error>
    where
        S: Future<Output = ()> + Send,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut outcome = Ok(());

        info!(
            queue = %self.entry.queue_name,
            task_name = %self.handler.task_name(),
            concurrency = self.concurrency,
            "Worker started"
        );

        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!(queue = %self.entry.queue_name, "Shutdown requested");
                    break;
                }
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    outcome = Err(anyhow!("Consumer failed: {}", e));
                    break;
                }
                None => {
                    warn!(queue = %self.entry.queue_name, "Consumer stream closed");
                    break;
                }
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("Worker semaphore closed"))?;

            let worker = self.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.settle(delivery).await;
            });

            while in_flight.try_join_next().is_some() {}
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight tasks");
        }
        while in_flight.join_next().await.is_some() {}

        info!(queue = %self.entry.queue_name, "Worker stopped");

        outcome
    }
}
