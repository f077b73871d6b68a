use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{error::StoreError, models::status::TaskState, store::TaskStateStore};

pub fn task_state_key(task_id: &str) -> String {
    format!("task_state:{}", task_id)
}

/// Per-task state kept in Redis with a TTL. Cloning shares the multiplexed connection.
#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
    ttl_seconds: u64,
}

impl RedisClient {
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url)
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            ttl_seconds,
        })
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl TaskStateStore for RedisClient {
    async fn state(&self, task_id: &str) -> Result<Option<TaskState>, StoreError> {
        let key = task_state_key(task_id);
        let mut connection = self.connection.clone();

        let value: Option<String> = connection
            .get(&key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(match value.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<TaskState>() {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(key = %key, error = %e, "Unknown task state in redis");
                    None
                }
            },
        })
    }

    async fn set_state(&self, task_id: &str, state: TaskState) -> Result<(), StoreError> {
        let key = task_state_key(task_id);
        let mut connection = self.connection.clone();

        connection
            .set_ex::<_, _, ()>(&key, state.as_str(), self.ttl_seconds)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
