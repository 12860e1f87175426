// Bounded retry with exponential backoff around arbitrary async operations.
//
// The executor knows nothing about serial ports or wizard steps; it only
// understands the error taxonomy well enough to refuse to retry `Cancelled`.
// Each attempt runs under a child cancellation scope so a per-attempt timeout
// can abort the in-flight operation without tearing down the caller's signal.

use std::future::Future;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::io::error::ProtoError;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try. Must be >= 1.
    pub max_attempts: u32,
    /// Sleep before the second attempt; grows by `backoff_factor` per retry.
    pub base_delay: Duration,
    /// Exponential backoff multiplier, >= 1.0.
    pub backoff_factor: f64,
    /// Optional wall-clock bound on each individual attempt.
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            per_attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            per_attempt_timeout: None,
        }
    }

    /// Backoff sleep before attempt `attempt + 1` (attempts are 1-based).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping an exponentially
/// growing delay between failures. The operation receives a child cancel
/// scope; cancelling `cancel` aborts immediately with `Cancelled`, which is
/// never retried and never counted against the budget. The last error is the
/// one surfaced after the final attempt.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, ProtoError>
where
    F: FnMut(CancelToken) -> Fut,
    Fut: Future<Output = Result<T, ProtoError>>,
{
    if policy.max_attempts == 0 {
        return Err(ProtoError::configuration("retry: max_attempts must be >= 1"));
    }

    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(ProtoError::Cancelled);
        }

        let attempt_cancel = cancel.child();
        let result = run_attempt(policy, cancel, &attempt_cancel, op(attempt_cancel.clone())).await;

        match result {
            Ok(value) => return Ok(value),
            Err(ProtoError::Cancelled) => return Err(ProtoError::Cancelled),
            Err(err) => {
                if attempt < policy.max_attempts {
                    tlog!(
                        "[retry] attempt {}/{} failed: {}",
                        attempt,
                        policy.max_attempts,
                        err
                    );
                    let delay = policy.backoff_delay(attempt);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
                        }
                    }
                }
                last_err = Some(err);
            }
        }
    }

    // max_attempts >= 1, so at least one attempt ran and recorded its error.
    Err(last_err.unwrap_or(ProtoError::configuration("retry: no attempts executed")))
}

/// `execute` with an explicit per-attempt timeout, overriding the policy's.
pub async fn execute_with_timeout<T, F, Fut>(
    policy: &RetryPolicy,
    per_attempt_timeout: Duration,
    cancel: &CancelToken,
    op: F,
) -> Result<T, ProtoError>
where
    F: FnMut(CancelToken) -> Fut,
    Fut: Future<Output = Result<T, ProtoError>>,
{
    let mut bounded = policy.clone();
    bounded.per_attempt_timeout = Some(per_attempt_timeout);
    execute(&bounded, cancel, op).await
}

async fn run_attempt<T, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    attempt_cancel: &CancelToken,
    fut: Fut,
) -> Result<T, ProtoError>
where
    Fut: Future<Output = Result<T, ProtoError>>,
{
    match policy.per_attempt_timeout {
        Some(bound) => {
            tokio::select! {
                result = fut => result,
                _ = tokio::time::sleep(bound) => {
                    attempt_cancel.cancel();
                    // A fired bound with a live parent signal means "device too
                    // slow", not "user cancelled".
                    if cancel.is_cancelled() {
                        Err(ProtoError::Cancelled)
                    } else {
                        Err(ProtoError::timeout("attempt budget", bound.as_millis() as u64))
                    }
                }
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    Err(ProtoError::Cancelled)
                }
            }
        }
        None => {
            tokio::select! {
                result = fut => result,
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    Err(ProtoError::Cancelled)
                }
            }
        }
    }
}
