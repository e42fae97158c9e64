//! Retry decisions and backoff for step execution.
//!
//! Stateless: all logic lives in associated functions that take the step's
//! retry budget and the executor configuration as parameters.

use std::time::Duration;

use stepgraph_types::workflow::StepFailure;

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should follow a failed one.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). A step with
    /// `retries = n` gets at most `n + 1` attempts. Only timeouts and
    /// action errors are retried.
    pub fn should_retry(retries: u32, attempt: u32, failure: &StepFailure) -> bool {
        failure.is_retryable() && attempt <= retries
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `base * 2^(retry - 1)`, capped at `max`.
    pub fn backoff(base: Duration, max: Duration, retry: u32) -> Duration {
        if base.is_zero() || retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        base.checked_mul(factor).unwrap_or(max).min(max)
    }
}
