//! Exponential backoff for transient infrastructure errors
//!
//! Metrics and platform calls time out in the field; those failures are
//! retried here with bounded exponential backoff and jitter instead of
//! being surfaced as incident failures. Semantic errors (a failed step,
//! a rejected approval) pass through untouched; only errors the
//! taxonomy marks transient are re-attempted.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Bounded retry policy for a single call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in either direction, 0.0..=1.0.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let spread = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        if spread == 0 {
            return delay;
        }
        let offset = rng.gen_range(0..=spread);
        if rng.gen_bool(0.5) {
            delay.saturating_add(Duration::from_millis(offset))
        } else {
            delay.saturating_sub(Duration::from_millis(offset))
        }
    }
}

/// Run `op`, retrying transient failures per `policy`. The final error
/// is returned unchanged once attempts are exhausted or a non-transient
/// error occurs.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.jittered(policy.backoff(attempt));
                debug!(
                    op = what,
                    attempt,
                    ?delay,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
