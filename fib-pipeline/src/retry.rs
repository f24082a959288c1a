//! Bounded retry for startup connections.
//!
//! The api and worker processes block here until the store answers. Callers
//! never see the intermediate failures, only the final one if the budget
//! runs out.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 30;

    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_ATTEMPTS,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` is spent.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "{what} became available");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, error = %err, "waiting for {what}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("{what} unavailable after {attempt} attempts"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
        assert_eq!(policy.delay_for(40), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_once_dependency_comes_up() -> Result<()> {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = retry(fast(5), "store", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("connection refused");
            }
            Ok(42)
        })
        .await?;

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(fast(3), "store", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        })
        .await;

        let err = result.expect_err("budget should run out");
        assert!(format!("{err:#}").contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
