//! End-to-end scenarios for the composed executor: retry inside one
//! breaker call, fail-fast denial, the half-open trial, and recovery.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;

use steadfast_core::error::ResilienceError;
use steadfast_core::policy::{CircuitBreakerConfig, RetryPolicy};
use steadfast_runtime::circuit_breaker::{CircuitBreaker, State};
use steadfast_runtime::executor::ResilienceExecutor;
use steadfast_runtime::fallback::Fallback;
use steadfast_testing::{FlakyOperation, init_tracing};

const BREAK: Duration = Duration::from_millis(150);

fn executor_for(breaker: CircuitBreaker) -> ResilienceExecutor<u32, String> {
    ResilienceExecutor::builder(breaker.name().to_string())
        .retry_policy(RetryPolicy::fixed(Duration::from_millis(10), 3))
        .circuit_breaker(breaker)
        .build()
        .unwrap()
}

fn breaker_with(threshold: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "orders",
        CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .break_duration(BREAK)
            .build()
            .unwrap(),
    )
    .unwrap()
}

/// The full lifecycle from the design discussion: two exhausted calls trip
/// the breaker, the third fails fast, and the post-break call is a single
/// trial attempt.
#[tokio::test]
async fn threshold_denial_and_trial_lifecycle() {
    init_tracing();
    let breaker = breaker_with(2);
    let executor = executor_for(breaker.clone());
    let op = FlakyOperation::always_failing();

    // First external call: three attempts inside, one recorded failure.
    let result = executor.execute(|| op.call()).await;
    assert!(matches!(
        result,
        Err(ResilienceError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(op.invocations(), 3);
    assert_eq!(breaker.consecutive_failures().await, 1);
    assert_eq!(breaker.state().await, State::Closed);

    // Second external call: three more attempts, threshold reached.
    let _ = executor.execute(|| op.call()).await;
    assert_eq!(op.invocations(), 6);
    assert_eq!(breaker.state().await, State::Open);

    // Third call, before the break elapses: denied without invoking.
    let result = executor.execute(|| op.call()).await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
    assert_eq!(op.invocations(), 6);

    // After the break: exactly one trial attempt (no retry sequence
    // against a recovering dependency), which fails with the underlying
    // error and re-opens with a fresh timer.
    tokio::time::sleep(BREAK + Duration::from_millis(50)).await;
    let result = executor.execute(|| op.call()).await;
    assert!(matches!(result, Err(ResilienceError::Operation(_))));
    assert_eq!(op.invocations(), 7);
    assert_eq!(breaker.state().await, State::Open);
    assert!(breaker.try_acquire().await.is_none());
}

/// While a trial is in flight, concurrent callers are denied immediately
/// instead of blocking on the trial's outcome.
#[tokio::test]
async fn concurrent_caller_during_trial_is_denied() {
    init_tracing();
    let breaker = breaker_with(1);
    let executor: ResilienceExecutor<u32, String> =
        ResilienceExecutor::builder(breaker.name().to_string())
            .retry_policy(RetryPolicy::no_retry())
            .circuit_breaker(breaker.clone())
            .build()
            .unwrap();

    // Trip the breaker, then wait out the break.
    let _ = executor
        .execute(|| async { Err::<u32, _>("down".to_string()) })
        .await;
    assert_eq!(breaker.state().await, State::Open);
    tokio::time::sleep(BREAK + Duration::from_millis(50)).await;

    // Trial holds the slot for a while before succeeding.
    let trial_executor = executor.clone();
    let trial = tokio::spawn(async move {
        trial_executor
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<u32, String>(1)
            })
            .await
    });

    // Give the trial time to claim the slot, then race a second call.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(breaker.state().await, State::HalfOpen);

    let started = std::time::Instant::now();
    let denied = executor.execute(|| async { Ok::<u32, String>(2) }).await;
    assert!(matches!(denied, Err(ResilienceError::CircuitOpen)));
    // Denied without waiting for the trial's remaining ~70ms.
    assert!(started.elapsed() < Duration::from_millis(60));

    // Trial success closes the circuit with a clean counter.
    let trial_result = trial.await.unwrap();
    assert!(matches!(trial_result, Ok(1)));
    assert_eq!(breaker.state().await, State::Closed);
    assert_eq!(breaker.consecutive_failures().await, 0);
}

/// A successful trial fully resets the counter: re-opening takes the full
/// threshold again.
#[tokio::test]
async fn recovery_resets_the_failure_budget() {
    init_tracing();
    let breaker = breaker_with(2);
    let executor: ResilienceExecutor<u32, String> =
        ResilienceExecutor::builder(breaker.name().to_string())
            .retry_policy(RetryPolicy::no_retry())
            .circuit_breaker(breaker.clone())
            .build()
            .unwrap();

    for _ in 0..2 {
        let _ = executor
            .execute(|| async { Err::<u32, _>("down".to_string()) })
            .await;
    }
    assert_eq!(breaker.state().await, State::Open);

    tokio::time::sleep(BREAK + Duration::from_millis(50)).await;
    let recovered = executor.execute(|| async { Ok::<u32, String>(1) }).await;
    assert!(matches!(recovered, Ok(1)));
    assert_eq!(breaker.state().await, State::Closed);

    // One fresh failure is not enough to re-open.
    let _ = executor
        .execute(|| async { Err::<u32, _>("down".to_string()) })
        .await;
    assert_eq!(breaker.state().await, State::Closed);
    let _ = executor
        .execute(|| async { Err::<u32, _>("down".to_string()) })
        .await;
    assert_eq!(breaker.state().await, State::Open);
}

/// Fallback substitution end to end: exhaustion and denial both convert to
/// the degraded value; the caller never sees the raw error.
#[tokio::test]
async fn fallback_substitutes_every_primary_failure() {
    init_tracing();
    let breaker = breaker_with(1);
    let op = FlakyOperation::always_failing();
    let executor: ResilienceExecutor<u32, String> =
        ResilienceExecutor::builder(breaker.name().to_string())
            .retry_policy(RetryPolicy::fixed(Duration::from_millis(5), 2))
            .circuit_breaker(breaker.clone())
            .fallback(Fallback::value(0))
            .build()
            .unwrap();

    // Exhaustion path.
    let result = executor.execute(|| op.call()).await;
    assert!(matches!(result, Ok(0)));
    assert_eq!(op.invocations(), 2);

    // Denial path: breaker is open now, operation untouched.
    let result = executor.execute(|| op.call()).await;
    assert!(matches!(result, Ok(0)));
    assert_eq!(op.invocations(), 2);
}

/// Sharing one breaker across executors for the same dependency: failures
/// recorded through one executor deny calls made through the other.
#[tokio::test]
async fn shared_breaker_protects_every_caller() {
    init_tracing();
    let breaker = breaker_with(1);
    let writer = executor_for(breaker.clone());
    let reader: ResilienceExecutor<u32, String> =
        ResilienceExecutor::builder(breaker.name().to_string())
            .retry_policy(RetryPolicy::no_retry())
            .circuit_breaker(breaker.clone())
            .build()
            .unwrap();

    let _ = writer
        .execute(|| async { Err::<u32, _>("down".to_string()) })
        .await;
    assert_eq!(breaker.state().await, State::Open);

    let denied = reader.execute(|| async { Ok::<u32, String>(9) }).await;
    assert!(matches!(denied, Err(ResilienceError::CircuitOpen)));
}
