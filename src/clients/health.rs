use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{database::DatabaseClient, rbmq::RabbitMqClient, redis::RedisClient},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const SLOW_RESPONSE_MS: u64 = 1_000;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), Error>;
}

#[async_trait]
impl HealthProbe for DatabaseClient {
    async fn probe(&self) -> Result<(), Error> {
        self.health_check().await
    }
}

#[async_trait]
impl HealthProbe for RedisClient {
    async fn probe(&self) -> Result<(), Error> {
        self.ping().await
    }
}

#[async_trait]
impl HealthProbe for RabbitMqClient {
    async fn probe(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(anyhow!("RabbitMQ connection is not open"))
        }
    }
}

/// Checks the already-open client handles; never opens connections of its own.
#[derive(Clone, Default)]
pub struct HealthChecker {
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, name: &str, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push((name.to_string(), probe));
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        for (name, probe) in &self.probes {
            checks.insert(name.clone(), Self::check(name, probe.as_ref()).await);
        }

        HealthCheckResponse {
            status: Self::determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check(name: &str, probe: &dyn HealthProbe) -> ServiceHealth {
        let start = Instant::now();

        match probe.probe().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(service = name, response_time_ms = elapsed, "Health check passed");

                if elapsed > SLOW_RESPONSE_MS {
                    ServiceHealth::degraded(format!("Slow response: {}ms", elapsed))
                } else {
                    ServiceHealth::healthy(elapsed)
                }
            }
            Err(e) => {
                warn!(service = name, error = %e, "Health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let has_unhealthy = checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy);

        let has_degraded = checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded);

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
