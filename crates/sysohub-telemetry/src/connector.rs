//! Connection establishment with exponential backoff

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{Result, TelemetryError};

/// Something a connection can be attempted against
#[async_trait]
pub trait Connect: Send + Sync {
    type Connection: Send;
    type Error: Display + Send;

    /// Make one connection attempt
    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error>;

    /// Human-readable target, for logs
    fn describe(&self) -> String;
}

/// An established connection delivering raw message payloads
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next payload
    ///
    /// # Errors
    /// Returns an error once the connection is lost.
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// Retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound for a single delay, `None` for unbounded doubling
    pub max_backoff: Option<Duration>,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: None,
        }
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Delay slept after the `failure`th failed attempt (1-based)
    pub fn delay_after(&self, failure: u32) -> Duration {
        let factor = 2u32.saturating_pow(failure.saturating_sub(1));
        let delay = self.initial_backoff.saturating_mul(factor);
        match self.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1)).with_max_backoff(Duration::from_secs(60))
    }
}

/// Connects to a target, sleeping between failed attempts
#[derive(Debug, Clone)]
pub struct RetryingConnector {
    policy: BackoffPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryingConnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            shutdown: None,
        }
    }

    /// Abort attempts and backoff sleeps once `shutdown` turns true
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Attempt to connect up to `max_attempts` times
    ///
    /// # Errors
    /// Returns `ConnectionFailed` once every attempt has failed, or
    /// `Cancelled` if shutdown was signalled first.
    pub async fn connect<C: Connect>(&self, target: &C) -> Result<C::Connection> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if self.is_shutting_down() {
                return Err(TelemetryError::Cancelled);
            }

            match target.connect().await {
                Ok(connection) => {
                    info!(target = %target.describe(), attempt, "connected");
                    return Ok(connection);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt == attempts {
                        warn!(
                            target = %target.describe(),
                            attempt,
                            error = %last_error,
                            "connection attempt failed, giving up"
                        );
                        break;
                    }
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        target = %target.describe(),
                        attempt,
                        error = %last_error,
                        retry_in = ?delay,
                        "connection attempt failed"
                    );
                    self.pause(delay).await?;
                }
            }
        }

        Err(TelemetryError::ConnectionFailed {
            attempts,
            last_error,
        })
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        let Some(mut shutdown) = self.shutdown.clone() else {
            sleep(delay).await;
            return Ok(());
        };

        tokio::select! {
            () = sleep(delay) => Ok(()),
            // a dropped sender disables this branch and the sleep runs out
            Ok(_) = shutdown.wait_for(|stop| *stop) => Err(TelemetryError::Cancelled),
        }
    }
}
