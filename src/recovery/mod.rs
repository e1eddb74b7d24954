// file: src/recovery/mod.rs
// version: 2.0.0
// guid: i9j0k1l2-m3n4-5678-9012-cdef34567890

//! Bounded retry for transient external failures.
//!
//! Only package installation and database service start go through here.
//! Security-relevant changes (firewall, accounts, lockout) are never retried.

use crate::config::RetrySettings;
use crate::system::CommandExecutor;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Record of one failed attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub operation: String,
    pub attempt_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub error_message: String,
}

/// Retry configuration for one class of operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            delay: settings.delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `command` until it succeeds or the attempts are exhausted.
    ///
    /// Returns the last error when every attempt failed. Failed attempts
    /// are appended to `history`.
    pub async fn execute(
        &self,
        exec: &mut dyn CommandExecutor,
        operation: &str,
        command: &str,
        history: &mut Vec<RetryAttempt>,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match exec.execute(command).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(());
                }
                Err(e) => {
                    history.push(RetryAttempt {
                        operation: operation.to_string(),
                        attempt_number: attempt,
                        timestamp: chrono::Utc::now(),
                        error_message: e.to_string(),
                    });

                    if attempt >= self.max_attempts {
                        warn!("{} failed after {} attempt(s): {}", operation, attempt, e);
                        return Err(e);
                    }

                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, self.delay, e
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
