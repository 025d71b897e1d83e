use std::time::Duration;

use xec_core::command::RetryPolicy;
use xec_core::config::EngineConfig;
use xec_core::engine::Engine;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

fn fast_default_retryable(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_millis(50),
        ..RetryPolicy::default()
    }
}

/// A command that times out on its first two attempts (simulated by a
/// counter-gated slow path) and completes quickly on the third. The
/// default `retryable` predicate accepts `TimeoutError`, so this recovers
/// without the caller ever seeing a failure.
#[tokio::test]
async fn transient_timeout_is_retried_until_the_command_stabilizes() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("attempts");
    tokio::fs::write(&counter, b"0").await.unwrap();
    let script = format!(
        "n=$(cat {path}); if [ $n -lt 2 ]; then n=$((n+1)); echo -n $n > {path}; sleep 2; else echo stable; fi",
        path = counter.display()
    );

    let result = engine
        .run(&["sh -c ", ""], &[script])
        .timeout(Duration::from_millis(150), None)
        .retry(fast_default_retryable(4))
        .output()
        .await
        .unwrap();

    assert_eq!(result.text(), "stable");
    let attempts = tokio::fs::read_to_string(&counter).await.unwrap();
    assert_eq!(attempts, "2");
}

#[tokio::test]
async fn retry_exhaustion_wraps_the_last_transient_error() {
    let engine = engine();
    let result = engine
        .run(&["sleep 2"], &[])
        .timeout(Duration::from_millis(50), None)
        .retry(fast_default_retryable(3))
        .output()
        .await;
    assert!(matches!(
        result,
        Err(xec_core::error::XecError::Retry { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn default_retry_policy_never_retries_a_plain_command_error() {
    let engine = engine();
    // `false` exits non-zero without any adapter-level error, so the
    // retry layer never even observes it as a candidate: a deliberate
    // exit code surfaces identically with or without `.retry(..)`
    // attached, matching "retry never fires for CommandError unless the
    // adapter itself raised an error".
    let result = engine
        .run(&["false"], &[])
        .retry(RetryPolicy::default())
        .output()
        .await;
    assert!(matches!(result, Err(xec_core::error::XecError::Command { .. })));
}

#[tokio::test]
async fn max_attempts_one_behaves_like_no_retry() {
    let engine = engine();
    let result = engine
        .run(&["sleep 2"], &[])
        .timeout(Duration::from_millis(50), None)
        .retry(fast_default_retryable(1))
        .output()
        .await;
    assert!(matches!(result, Err(xec_core::error::XecError::Timeout { .. })));
}
