//! Readiness waiting
//!
//! A node with `wait_for` blocks before launch until its waiter reports the
//! described resource as ready. The core only relies on the [`Waiter`]
//! contract; [`TcpWaiter`] is the implementation used by default.

use crate::error::ReadinessError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::debug;

/// Readiness descriptor attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WaitFor {
    /// `host:port` expected to accept connections
    pub address: String,

    /// Seconds to keep trying before giving up
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Milliseconds between attempts
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_timeout() -> u64 {
    60
}

fn default_interval() -> u64 {
    500
}

impl WaitFor {
    pub fn new(address: impl Into<String>) -> Self {
        WaitFor {
            address: address.into(),
            timeout: default_timeout(),
            interval: default_interval(),
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_interval(mut self, millis: u64) -> Self {
        self.interval = millis;
        self
    }
}

/// Blocks until a readiness descriptor is satisfied or definitely is not
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, target: &WaitFor) -> Result<(), ReadinessError>;
}

/// Polls a TCP address until a connection succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpWaiter;

#[async_trait]
impl Waiter for TcpWaiter {
    async fn wait(&self, target: &WaitFor) -> Result<(), ReadinessError> {
        if target.address.trim().is_empty() {
            return Err(ReadinessError::Invalid("empty address".to_string()));
        }

        let deadline = Instant::now() + Duration::from_secs(target.timeout);
        let interval = Duration::from_millis(target.interval.max(1));

        loop {
            let attempt = time::timeout(interval, TcpStream::connect(&target.address)).await;
            let last_error = match attempt {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };
            debug!("Waiting for {}: {}", target.address, last_error);

            if Instant::now() >= deadline {
                return Err(ReadinessError::Timeout {
                    address: target.address.clone(),
                    seconds: target.timeout,
                    last_error,
                });
            }
            time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }
}
