//! Bounded restart-from-scratch retries

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use blobyard_store::StoreError;
use thiserror::Error;
use tracing::warn;

/// Classifies whether a failed attempt may be repeated
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("Non-retryable failure: {0}")]
    Fatal(E),
}

/// Runs an operation up to `max_attempts` times with linear backoff.
///
/// Every attempt is a brand-new invocation of the operation; nothing from a
/// failed attempt is handed to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause taken before `attempt` (1-based); the first attempt runs immediately
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }

    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(RetryError::Fatal(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e })
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, restarting"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}
