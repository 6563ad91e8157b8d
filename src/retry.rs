//! Retry with bounded exponential backoff
//!
//! Shared by the contract caller, the connection manager's chain reads and
//! the receipt poll.

use crate::config::{RETRY_BACKOFF_FACTOR, RETRY_MAX_DELAY};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay before `attempt` (1-based) retries, geometric in `factor` and
/// clamped to `[initial, max]`.
pub(crate) fn backoff_delay(attempt: u32, initial: Duration, factor: f64, max: Duration) -> Duration {
    let exp = factor.powi(attempt.saturating_sub(1) as i32);
    let ms = (initial.as_millis() as f64 * exp).min(max.as_millis() as f64);
    Duration::from_millis(ms as u64)
}

/// Run `op` up to `max_retries` times, sleeping between attempts with
/// exponential backoff bounded by `[initial_delay, RETRY_MAX_DELAY]`.
///
/// `on_error` is invoked with the attempt number and the error before each
/// sleep; it observes failures, it cannot cancel the retry loop. The final
/// error is returned as-is.
pub async fn call_with_retry<T, F, Fut, O>(
    operation: &str,
    mut op: F,
    mut on_error: O,
    max_retries: u32,
    initial_delay: Duration,
) -> GatewayResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
    O: FnMut(u32, &GatewayError),
{
    debug_assert!(max_retries > 0);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "All retry attempts exhausted"
                    );
                    return Err(err);
                }

                on_error(attempt, &err);
                metrics::record_retry(operation);

                let delay = backoff_delay(attempt, initial_delay, RETRY_BACKOFF_FACTOR, RETRY_MAX_DELAY);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
