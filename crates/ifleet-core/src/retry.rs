use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::Result;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

/// Bounded retry for transient companion failures.
///
/// `max_retries` counts retries, not attempts: 0 means the call runs exactly
/// once. Only errors classified retryable by [`crate::FleetError::is_retryable`]
/// are retried; everything else passes straight through.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Exponential,
        }
    }

    /// A single attempt, no delays. Useful as the explicit "no retry" value.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt + 1),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max_delay)
    }

    /// Run `op`, retrying transient failures until it succeeds or the retry
    /// budget is spent. Returns the first success or the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(operation, attempts = attempt + 1, error = %e, "all attempts failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FleetError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> FleetError {
        FleetError::connection("0000", "refused")
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result = policy
            .run("info", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(transient()) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<()> = policy
            .run("info", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(FleetError::Connection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_passes_through_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<()> = policy
            .run("launch", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FleetError::Command("app not installed".into())) }
            })
            .await;

        assert!(matches!(result, Err(FleetError::Command(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::none()
            .run("tap", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_shapes() {
        let base = Duration::from_millis(100);
        let fixed = RetryPolicy::new(3, base).with_backoff(Backoff::Fixed);
        let linear = RetryPolicy::new(3, base).with_backoff(Backoff::Linear);
        let expo = RetryPolicy::new(3, base).with_backoff(Backoff::Exponential);

        assert_eq!(fixed.delay_for(2), base);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));
        assert_eq!(expo.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_clamped_to_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(2));
        assert_eq!(policy.delay_for(9), Duration::from_secs(2));
    }
}
