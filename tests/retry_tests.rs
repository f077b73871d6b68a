use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use notification_router::{models::retry::RetryConfig, utils::retry_with_backoff};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn config(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2,
    }
}

/// Test: A connection that opens first time is attempted once
#[tokio::test]
async fn test_first_attempt_success_is_not_retried() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(3, 50, 500), "broker_connect", || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("connected")
        }
    })
    .await?;

    assert_eq!(result, "connected");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: A dependency that comes up late is reached after a few retries
#[tokio::test]
async fn test_late_dependency_is_retried_until_up() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(5, 20, 200), "postgres_connect", || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection refused"))
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(assert_ok!(result), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: The last error is returned once every attempt is spent
#[tokio::test]
async fn test_exhausted_attempts_return_last_error() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(4, 10, 100), "redis_connect", || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("attempt {} failed", n + 1))
        }
    })
    .await;

    let err = assert_err!(result);
    assert_eq!(err.to_string(), "attempt 4 failed");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    Ok(())
}

/// Test: A zero attempt budget still tries once
#[tokio::test]
async fn test_zero_attempts_still_runs_once() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(0, 10, 100), "broker_connect", || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("down"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Delays grow between attempts but never past the cap
#[tokio::test]
async fn test_backoff_grows_and_is_capped() -> Result<()> {
    // Uncapped this would wait 40 + 80 + 160 + 320 ms.
    let config = config(5, 40, 60);
    let start = Instant::now();

    let _ = retry_with_backoff(&config, "broker_connect", || async {
        Err::<(), _>(anyhow!("down"))
    })
    .await;

    let elapsed = start.elapsed().as_millis();

    // 40 + 60 + 60 + 60 with up to 10% jitter either way.
    assert!(elapsed >= 190, "waited only {}ms", elapsed);
    assert!(elapsed < 500, "cap ignored, waited {}ms", elapsed);

    Ok(())
}

/// Test: Concurrent startups keep their own attempt counts
#[tokio::test]
async fn test_concurrent_retries_are_independent() -> Result<()> {
    let config = Arc::new(config(5, 20, 200));

    let failing = {
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            retry_with_backoff(&config, "redis_connect", || async {
                Err::<(), _>(anyhow!("down"))
            })
            .await
        })
    };

    let recovering_attempts = Arc::new(AtomicU32::new(0));
    let recovering = {
        let config = Arc::clone(&config);
        let counter = Arc::clone(&recovering_attempts);
        tokio::spawn(async move {
            retry_with_backoff(&config, "postgres_connect", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(anyhow!("starting up"))
                    } else {
                        Ok("ready")
                    }
                }
            })
            .await
        })
    };

    let (failing, recovering) = tokio::join!(failing, recovering);

    assert!(failing?.is_err());
    assert_eq!(recovering??, "ready");
    assert_eq!(recovering_attempts.load(Ordering::SeqCst), 2);

    Ok(())
}
