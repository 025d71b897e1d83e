//! Exponential backoff with jitter, driving `Command.retry`.
//!
//! Grounded in the same attempt/backoff shape as the `backoff` crate's
//! `ExponentialBackoff`, but driven explicitly so each attempt can emit a
//! `step:retry` event and respect a `CancellationToken`.

use std::time::Duration;

use rand::Rng;

use crate::command::RetryPolicy;
use crate::error::XecError;
use crate::events::{Event, EventBus};

/// Computes the delay before attempt number `attempt` (1-indexed attempts
/// already made), applying proportional jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.initial_delay.as_secs_f64() * policy.backoff_multiplier.powi(attempt as i32 - 1);
    let capped = base.min(policy.max_delay.as_secs_f64());
    let jitter_factor = if policy.jitter > 0.0 {
        let spread = policy.jitter.clamp(0.0, 1.0);
        1.0 + rand::rng().random_range(-spread..=spread)
    } else {
        1.0
    };
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

/// Runs `attempt_fn` up to `policy.max_attempts` times, retrying only when
/// `policy.retryable` accepts the error. Emits `step:retry` between
/// attempts. A non-retryable error is returned as-is, unwrapped: it never
/// went through a retry cycle, so it isn't a `RetryError`. Only exhaustion
/// after at least one genuine retry wraps the last error in
/// `XecError::Retry`, with `attempts` set to the number of attempts
/// actually made (so `maxAttempts: 1` is indistinguishable from no retry).
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    events: &EventBus,
    mut attempt_fn: F,
) -> Result<T, XecError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, XecError>>,
{
    let mut last_err: Option<XecError> = None;
    let mut attempts_made = 0;
    for attempt in 1..=policy.max_attempts {
        attempts_made = attempt;
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !(policy.retryable)(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    last_err = Some(err);
                    break;
                }
                let delay = backoff_delay(policy, attempt);
                events.emit(Event::StepRetry {
                    attempt,
                    max_attempts: policy.max_attempts,
                    error: err.to_string(),
                    delay,
                });
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    let err = last_err.expect("loop always sets last_err before exiting without returning Ok");
    if attempts_made <= 1 {
        return Err(err);
    }
    Err(XecError::Retry {
        attempts: attempts_made,
        source: Box::new(err),
        last_result: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
            retryable: std::sync::Arc::new(|_| true),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_delay() {
        let policy = no_jitter_policy(3);
        let events = EventBus::new(8, true);
        let calls = AtomicU32::new(0);
        let result: Result<_, XecError> = run_with_retry(&policy, &events, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, XecError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_exhausted() {
        let policy = no_jitter_policy(3);
        let events = EventBus::new(8, true);
        let calls = AtomicU32::new(0);
        let result: Result<(), XecError> = run_with_retry(&policy, &events, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(XecError::Connection {
                    host: "h".into(),
                    source: anyhow::anyhow!("boom"),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(XecError::Retry { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let mut policy = no_jitter_policy(5);
        policy.retryable = std::sync::Arc::new(|_| false);
        let events = EventBus::new(8, true);
        let calls = AtomicU32::new(0);
        let result: Result<(), XecError> = run_with_retry(&policy, &events, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(XecError::Validation("nope".into())) }
        })
        .await;
        assert!(matches!(result, Err(XecError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_is_equivalent_to_no_retry() {
        let policy = no_jitter_policy(1);
        let events = EventBus::new(8, true);
        let calls = AtomicU32::new(0);
        let result: Result<(), XecError> = run_with_retry(&policy, &events, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(XecError::Connection {
                    host: "h".into(),
                    source: anyhow::anyhow!("boom"),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(XecError::Connection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
