//! In-process host retry policy.
//!
//! Gives each activity invocation at-least-once semantics: the operation is
//! attempted up to `max_attempts` times, each attempt bounded by the
//! start-to-close timeout, with capped exponential waits in between.
//! Non-retryable errors stop immediately.

use std::future::Future;

use casflow_types::config::RetryPolicy;

use super::activity::ActivityError;

/// Run `op` under `policy`. `op` receives the 1-based attempt number.
pub async fn run_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    activity: &str,
    mut op: F,
) -> Result<T, ActivityError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = policy.start_to_close_timeout();
    let mut attempt: u32 = 1;

    loop {
        let outcome = match tokio::time::timeout(timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ActivityError::Timeout(timeout)),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            tracing::warn!(activity, attempt, error = %err, "non-retryable activity failure");
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::warn!(activity, attempt, error = %err, "activity retries exhausted");
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            activity,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "activity attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
