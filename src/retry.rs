//! Bounded retry with exponential backoff and jitter

use crate::config::RetryPolicy;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay before retry number `attempt` (1-based), before jitter
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.multiplier.powi(attempt.saturating_sub(1) as i32);
    let millis = policy.base_delay.as_millis() as f64 * exp;
    let capped = millis.min(policy.max_delay.as_millis() as f64);
    Duration::from_millis(capped.max(0.0) as u64)
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    Duration::from_millis((delay.as_millis() as f64 * factor.max(0.0)) as u64)
}

/// Run `op` until it succeeds, returns a non-transient error, or the policy's
/// attempt budget is spent. The last error is returned on exhaustion.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_transient() => {
                let delay = jittered(backoff_delay(policy, attempt), policy.jitter);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
