use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    dispatch::{BrokerConnector, TaskPublisher},
    error::DispatchError,
    models::task::DispatchTask,
    registry::RegistryEntry,
};

const PERSISTENT: u8 = 2;
const JSON_CONTENT_TYPE: &str = "application/json";

pub struct RabbitMqClient {
    connection: Connection,
}

impl RabbitMqClient {
    pub async fn connect(broker_uri: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(broker_uri, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        Ok(Self { connection })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Channel with publisher confirms on, topology for `entry` declared.
    pub async fn publisher(&self, entry: &RegistryEntry) -> Result<AmqpPublisher, lapin::Error> {
        let channel = self.connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        declare_topology(&channel, entry).await?;

        debug!(worker = %entry.name, queue = %entry.queue_name, "Publisher channel ready");

        Ok(AmqpPublisher {
            channel,
            declared_delay_queues: Mutex::new(HashSet::new()),
        })
    }

    /// Consumer on `entry`'s queue, never holding more than `prefetch_count` unacked tasks.
    pub async fn consumer(
        &self,
        entry: &RegistryEntry,
        prefetch_count: u16,
    ) -> Result<Consumer, Error> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        declare_topology(&channel, entry)
            .await
            .map_err(|e| anyhow!("Failed to declare topology for {}: {}", entry.queue_name, e))?;

        let consumer = channel
            .basic_consume(
                &entry.queue_name,
                &entry.name,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(
            queue = %entry.queue_name,
            consumer_tag = %entry.name,
            prefetch_count,
            "Consumer created"
        );

        Ok(consumer)
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqClient {
    async fn publisher_for(
        &self,
        entry: &RegistryEntry,
    ) -> Result<Arc<dyn TaskPublisher>, DispatchError> {
        let publisher = self.publisher(entry).await?;
        Ok(Arc::new(publisher))
    }
}

pub fn exchange_kind(exchange_type: &str) -> ExchangeKind {
    match exchange_type.trim().to_ascii_lowercase().as_str() {
        "" | "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

async fn declare_topology(channel: &Channel, entry: &RegistryEntry) -> Result<(), lapin::Error> {
    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .queue_declare(&entry.queue_name, durable_queue, FieldTable::default())
        .await?;

    if entry.exchange_name.is_empty() {
        return Ok(());
    }

    channel
        .exchange_declare(
            &entry.exchange_name,
            exchange_kind(&entry.exchange_type),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            &entry.queue_name,
            &entry.exchange_name,
            &entry.binding_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Name of the holding queue that dead-letters into `entry` after `delay_ms`.
pub fn delay_queue_name(delay_ms: u64, entry: &RegistryEntry) -> String {
    format!(
        "delay.{}.{}.{}",
        delay_ms, entry.exchange_name, entry.binding_key
    )
}

pub struct AmqpPublisher {
    channel: Channel,
    declared_delay_queues: Mutex<HashSet<String>>,
}

impl AmqpPublisher {
    async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        task: &DispatchTask,
    ) -> Result<(), DispatchError> {
        let payload = task.encode()?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_message_id(task.uuid.as_str().into());

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(DispatchError::PublishFailure(format!(
                "broker nacked task {}",
                task.uuid
            )));
        }

        Ok(())
    }

    async fn ensure_delay_queue(
        &self,
        entry: &RegistryEntry,
        delay_ms: u64,
    ) -> Result<String, DispatchError> {
        let name = delay_queue_name(delay_ms, entry);

        let mut declared = self.declared_delay_queues.lock().await;
        if declared.contains(&name) {
            return Ok(name);
        }

        let ttl = i64::try_from(delay_ms).unwrap_or(i64::MAX);

        let mut arguments = FieldTable::default();
        arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl));
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(entry.exchange_name.as_str().into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(entry.binding_key.as_str().into()),
        );
        arguments.insert(
            "x-expires".into(),
            AMQPValue::LongLongInt(ttl.saturating_mul(2)),
        );

        self.channel
            .queue_declare(
                &name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await?;

        declared.insert(name.clone());

        Ok(name)
    }
}

#[async_trait]
impl TaskPublisher for AmqpPublisher {
    async fn publish(
        &self,
        entry: &RegistryEntry,
        task: &DispatchTask,
    ) -> Result<(), DispatchError> {
        self.publish_raw(&entry.exchange_name, &entry.binding_key, task)
            .await
    }

    async fn publish_delayed(
        &self,
        entry: &RegistryEntry,
        task: &DispatchTask,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let queue = self.ensure_delay_queue(entry, delay_ms).await?;

        debug!(task_id = %task.uuid, queue = %queue, delay_ms, "Scheduling delayed task");

        self.publish_raw("", &queue, task).await
    }
}
