//! Resilience utilities: connection retry and error backoff.
//!
//! - [`RetryConfig`]: exponential backoff schedule for establishing connections
//! - [`connect_redis`]: open a Redis `ConnectionManager` with that schedule
//! - [`ErrorBackoff`]: doubling delay for long-running loops hitting transient errors

use crate::error::{Result, StockError};
use crate::metrics;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of connection attempts.
    /// Set to `usize::MAX` for infinite retries.
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Retry schedule for service startup.
    ///
    /// Gives up after 20 attempts so a misconfigured Redis URL surfaces
    /// instead of hanging the process.
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        500ms     500ms
    /// 2        750ms     1.25s
    /// 3        1.12s     2.37s
    /// ...
    /// 20       30s       ~45s (total)
    /// ```
    pub fn startup() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1).min(i32::MAX as usize) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(delay_secs)
    }
}

/// Open a Redis connection manager, retrying per `retry`.
///
/// `label` names the connection in logs and metrics ("cache", "stream").
pub async fn connect_redis(url: &str, retry: &RetryConfig, label: &str) -> Result<ConnectionManager> {
    info!(target_name = label, url = %url, "Connecting to Redis");

    let client = Client::open(url)
        .map_err(|e| StockError::Config(format!("Invalid Redis URL for {}: {}", label, e)))?;

    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match timeout(retry.connection_timeout, client.get_connection_manager()).await {
            Ok(Ok(conn)) => {
                metrics::record_connection(label, true);
                if attempt > 1 {
                    info!(target_name = label, attempt, "Connected to Redis after retry");
                } else {
                    info!(target_name = label, "Connected to Redis");
                }
                return Ok(conn);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", retry.connection_timeout.as_millis()),
        };

        if attempt >= retry.max_attempts {
            metrics::record_connection(label, false);
            error!(
                target_name = label,
                attempt,
                error = %failure,
                "Failed to connect after max retries"
            );
            return Err(StockError::cache_msg(
                format!("connect {}", label),
                format!("failed after {} attempts: {}", attempt, failure),
            ));
        }

        let delay = retry.delay_for_attempt(attempt);
        warn!(
            target_name = label,
            attempt,
            delay_ms = delay.as_millis(),
            error = %failure,
            "Connection attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Doubling backoff for loops that keep running through transient errors.
#[derive(Debug, Clone)]
pub struct ErrorBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    consecutive: u32,
}

impl ErrorBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            consecutive: 0,
        }
    }

    /// Delay to wait now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.consecutive = self.consecutive.saturating_add(1);
        self.current = std::cmp::min(
            Duration::from_secs_f64(self.current.as_secs_f64() * 2.0),
            self.max,
        );
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.consecutive = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
