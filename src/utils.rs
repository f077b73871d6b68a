use std::future::Future;

use tokio::{
    signal,
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{config::LogFormat, models::retry::RetryConfig};

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

/// Runs `operation` until it succeeds or `config.max_attempts` is reached, sleeping with
/// exponential backoff and +/-10% jitter between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                max_attempts,
                error = %error,
                "Giving up after exhausting all attempts"
            );
            return Err(error);
        }

        debug!(
            operation = operation_name,
            attempt,
            max_attempts,
            delay_ms,
            error = %error,
            "Attempt failed, backing off"
        );

        let jitter = rand::random_range(-0.1..=0.1);
        let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

        sleep(Duration::from_millis(jittered_delay)).await;

        delay_ms = delay_ms
            .saturating_mul(config.backoff_multiplier.max(1))
            .min(config.max_delay_ms);
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
