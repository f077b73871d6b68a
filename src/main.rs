use std::sync::Arc;

use anyhow::{Context, Error, Result};
use notification_router::{
    api::{self, AppState},
    clients::{
        database::DatabaseClient, delivery::adapter_for, health::HealthChecker,
        rbmq::RabbitMqClient, redis::RedisClient,
    },
    config::{Config, ProcessRole},
    engine::RoutingEngine,
    registry::ChannelRegistry,
    store::ConfigStore,
    utils::{init_tracing, retry_with_backoff, shutdown_signal},
    worker::{ChannelWorker, TaskHandler, deliver::DeliveryTaskHandler, route::RouteTaskHandler},
};
use tracing::info;

struct Clients {
    database: Arc<DatabaseClient>,
    redis: Arc<RedisClient>,
    broker: Arc<RabbitMqClient>,
}

async fn connect(config: &Config) -> Result<Clients, Error> {
    let retry = config.retry_config();

    let broker = retry_with_backoff(&retry, "rabbitmq_connect", || {
        RabbitMqClient::connect(&config.broker_uri)
    })
    .await?;

    let database = retry_with_backoff(&retry, "postgres_connect", || {
        DatabaseClient::connect(&config.database_url)
    })
    .await?;
    database.migrate().await?;

    let redis = retry_with_backoff(&retry, "redis_connect", || {
        RedisClient::connect(&config.redis_url, config.task_state_ttl_seconds)
    })
    .await?;

    Ok(Clients {
        database: Arc::new(database),
        redis: Arc::new(redis),
        broker: Arc::new(broker),
    })
}

async fn run_server(config: Config, clients: Clients) -> Result<(), Error> {
    let master = config.worker_entry()?;
    let publisher = clients
        .broker
        .publisher(&master)
        .await
        .context("Failed to open master queue publisher")?;

    let health_checker = HealthChecker::new()
        .with_probe("database", clients.database.clone())
        .with_probe("task_state", clients.redis.clone())
        .with_probe("message_broker", clients.broker.clone());

    let state = Arc::new(AppState {
        health_checker,
        publisher: Arc::new(publisher),
        master,
    });

    api::run_api_server(config.server_port, state).await
}

async fn run_worker(
    config: &Config,
    clients: &Clients,
    handler: Arc<dyn TaskHandler>,
) -> Result<(), Error> {
    let entry = config.worker_entry()?;

    let retry_publisher = clients
        .broker
        .publisher(&entry)
        .await
        .context("Failed to open retry publisher")?;

    let consumer = clients
        .broker
        .consumer(&entry, config.prefetch_count)
        .await?;

    let worker = Arc::new(ChannelWorker::new(
        entry,
        handler,
        clients.redis.clone(),
        Arc::new(retry_publisher),
        config.worker_concurrency,
    ));

    worker.run(consumer, shutdown_signal()).await
}

async fn run_master(config: Config, clients: Clients) -> Result<(), Error> {
    let registry = ChannelRegistry::bootstrap(
        clients.database.as_ref(),
        clients.broker.as_ref(),
        config.worker_entry()?,
    )
    .await?;

    info!(
        entries = registry.len(),
        channels = ?registry.channels().collect::<Vec<_>>(),
        "Channel registry ready"
    );

    let store: Arc<dyn ConfigStore> = clients.database.clone();
    let engine = RoutingEngine::new(store, Arc::new(registry));

    run_worker(&config, &clients, Arc::new(RouteTaskHandler::new(engine))).await
}

async fn run_slave(config: Config, clients: Clients) -> Result<(), Error> {
    let entry = config.worker_entry()?;
    let channel = entry
        .role
        .channel()
        .context("Slave worker has no channel type")?;

    clients
        .database
        .register_channel_worker(&entry)
        .await
        .context("Failed to register worker metadata")?;

    let adapter = adapter_for(channel, &config)?;
    let handler = DeliveryTaskHandler::new(
        clients.database.clone(),
        clients.database.clone(),
        adapter,
    );

    run_worker(&config, &clients, Arc::new(handler)).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(config.log_format);

    info!(
        role = ?config.role,
        worker = %config.worker_name,
        queue = %config.default_queue,
        "Starting notification router"
    );

    let clients = connect(&config).await?;

    match config.role {
        ProcessRole::Server => run_server(config, clients).await,
        ProcessRole::Master => run_master(config, clients).await,
        ProcessRole::Slave => run_slave(config, clients).await,
    }
}
