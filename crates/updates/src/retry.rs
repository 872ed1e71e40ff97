//! Retry policy for per-work fetches.

use crate::provider::ProviderResult;
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, to retry a transient provider failure.
///
/// Only [transient](crate::ProviderErrorKind::is_transient) errors are
/// retried. Anything else is returned straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self { max_attempts: 1, delay: Duration::ZERO }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. Returns the last result and how many attempts were made.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> (ProviderResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = operation().await;
            match &result {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(attempt, error = ?e, "transient provider error; retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                },
                _ => return (result, attempt),
            }
        }
    }
}
