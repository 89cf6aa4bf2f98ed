// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for storage operations.
//!
//! Used when opening and querying the SQLite backend. Mutation replay does
//! not go through here.
//!
//! # Example
//!
//! ```
//! use offline_sync::RetryConfig;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//!
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, 3);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Attempt budget and backoff curve for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first.
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Opening the database.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Individual reads.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay to wait after `delay`, capped at `max_delay`.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = config.max_retries,
                    error = %err,
                    next_delay = ?delay,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_locked_database_recovers_within_budget() {
        let attempts = AtomicUsize::new(0);

        let result = retry("open_db", &RetryConfig::test(), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::Unavailable("database is locked".into()))
            } else {
                Ok("opened")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "opened");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), StorageError> = retry("init_schema", &RetryConfig::test(), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(StorageError::Backend(format!("attempt {}", n)))
        })
        .await;

        assert!(matches!(result, Err(StorageError::Backend(msg)) if msg == "attempt 3"));
        assert_eq!(attempts.load(Ordering::SeqCst), RetryConfig::test().max_retries);
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = RetryConfig::startup();
        let mut delay = config.initial_delay;
        for _ in 0..10 {
            delay = config.next_delay(delay);
        }
        assert_eq!(delay, config.max_delay);
    }
}
