//! Bounded exponential backoff.
//!
//! Used by the refresh orchestrator around store operations and by the
//! HTTP embedding/completion providers. Attempt `n` (1-based retry count)
//! waits `base * 2^(n-1)`, capped at `max`.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::config::RefreshConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, retries: u32) -> Self {
        Self { base, max, retries }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0)
    }

    pub fn from_refresh(config: &RefreshConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.store_retries,
        )
    }

    /// Delay before retry number `attempt` (1-based). Zero for attempt 0.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Run `op` until it succeeds or the retry budget is spent. Returns the
/// last error when every attempt failed.
pub async fn retry<T, F, Fut>(policy: &Backoff, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{e:#}"),
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
