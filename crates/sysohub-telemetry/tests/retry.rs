//! Backoff timing of `RetryingConnector` against scripted targets

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use sysohub_telemetry::{BackoffPolicy, Connect, RetryingConnector, TelemetryError};

/// Fails the first `failures` attempts, recording when each attempt happened
struct FlakyTarget {
    failures: usize,
    attempts: Mutex<Vec<Instant>>,
}

impl FlakyTarget {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn gaps(&self) -> Vec<u64> {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    fn count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Connect for FlakyTarget {
    type Connection = &'static str;
    type Error = String;

    async fn connect(&self) -> Result<&'static str, String> {
        let mut attempts = self.attempts.lock().unwrap();
        attempts.push(Instant::now());
        if attempts.len() <= self.failures {
            Err(format!("refused #{}", attempts.len()))
        } else {
            Ok("connected")
        }
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_five_attempts() {
    let target = FlakyTarget::new(usize::MAX);
    let connector = RetryingConnector::new(BackoffPolicy::new(5, Duration::from_secs(1)));

    let err = connector.connect(&target).await.unwrap_err();

    assert_eq!(
        err,
        TelemetryError::ConnectionFailed {
            attempts: 5,
            last_error: "refused #5".to_string(),
        }
    );
    assert_eq!(target.count(), 5);
    assert_eq!(target.gaps(), vec![1, 2, 4, 8]);
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_after_failures() {
    let target = FlakyTarget::new(2);
    let connector = RetryingConnector::new(BackoffPolicy::default());

    let connection = connector.connect(&target).await.unwrap();

    assert_eq!(connection, "connected");
    assert_eq!(target.gaps(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_does_not_sleep() {
    let target = FlakyTarget::new(0);
    let connector = RetryingConnector::new(BackoffPolicy::default());
    let start = Instant::now();

    connector.connect(&target).await.unwrap();

    assert_eq!(target.count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cap_limits_delays() {
    let target = FlakyTarget::new(usize::MAX);
    let policy =
        BackoffPolicy::new(6, Duration::from_secs(4)).with_max_backoff(Duration::from_secs(10));

    let _ = RetryingConnector::new(policy).connect(&target).await;

    assert_eq!(target.gaps(), vec![4, 8, 10, 10, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_backoff() {
    let target = std::sync::Arc::new(FlakyTarget::new(usize::MAX));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connector = RetryingConnector::new(BackoffPolicy::new(5, Duration::from_secs(30)))
        .with_shutdown(shutdown_rx);

    let task = {
        let target = target.clone();
        tokio::spawn(async move { connector.connect(target.as_ref()).await })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown_tx.send(true).unwrap();

    let result = task.await.unwrap();
    assert_eq!(result, Err(TelemetryError::Cancelled));
    assert_eq!(target.count(), 1);
}

#[tokio::test]
async fn test_already_shut_down() {
    let target = FlakyTarget::new(0);
    let (_tx, shutdown_rx) = watch::channel(true);
    let connector = RetryingConnector::new(BackoffPolicy::default()).with_shutdown(shutdown_rx);

    assert_eq!(
        connector.connect(&target).await,
        Err(TelemetryError::Cancelled)
    );
    assert_eq!(target.count(), 0);
}
