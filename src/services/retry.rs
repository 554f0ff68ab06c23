//! Bounded retry for startup operations

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// All attempts failed; carries the last error.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryExhausted<E>
where
    E: std::error::Error + 'static,
{
    pub operation: String,
    pub attempts: u32,
    #[source]
    pub last: E,
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `attempt` until it succeeds or the attempts are used up.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Display + 'static,
    {
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) if n < self.max_attempts => {
                    warn!(
                        operation = operation,
                        attempt = n,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, retrying in {:?}",
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    n += 1;
                }
                Err(e) => {
                    error!(
                        operation = operation,
                        attempts = n,
                        "Giving up after all retries"
                    );
                    return Err(RetryExhausted {
                        operation: operation.to_string(),
                        attempts: n,
                        last: e,
                    });
                }
            }
        }
    }
}
