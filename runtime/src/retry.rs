//! Retry execution with exponential backoff for transient failures.
//!
//! The loop here drives every attempt sequence in the library: the free
//! functions cover the standalone use case, and the executor feeds the same
//! driver with its per-attempt timeout, cancellation token, and observer.
//!
//! Backoff waits are suspension points (`tokio::time::sleep`), never thread
//! sleeps: concurrent callers keep making progress while one waits.
//!
//! # Example
//!
//! ```rust
//! use steadfast_core::policy::RetryPolicy;
//! use steadfast_runtime::retry::retry_with_backoff;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(std::time::Duration::from_millis(100))
//!     .build()?;
//!
//! let result = retry_with_backoff(policy, || async {
//!     // Your fallible operation here
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use steadfast_core::error::ResilienceError;
use steadfast_core::events::{NoopObserver, ResilienceEvent, ResilienceObserver};
use steadfast_core::policy::RetryPolicy;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::metrics::RetryMetrics;

/// Drives one attempt sequence: classification, backoff, timeout,
/// cancellation, and event emission. Shared by the free functions and the
/// executor.
///
/// Generic over the predicate so callers keep their concrete closure (or
/// a `Send + Sync` trait object) and spawned futures stay `Send`.
pub(crate) struct AttemptDriver<'a, P: ?Sized> {
    pub name: &'a str,
    pub policy: &'a RetryPolicy,
    pub is_retryable: &'a P,
    pub attempt_timeout: Option<Duration>,
    pub cancellation: Option<&'a CancellationToken>,
    pub observer: &'a dyn ResilienceObserver,
}

impl<P: ?Sized> AttemptDriver<'_, P> {
    /// Run the operation until success, a terminal failure, or cancellation.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 1;

        loop {
            RetryMetrics::record_attempt(self.name);

            match self.run_attempt(&mut operation).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(call = self.name, attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ResilienceError::Cancelled) => {
                    tracing::debug!(call = self.name, attempt, "call cancelled during attempt");
                    return Err(ResilienceError::Cancelled);
                }
                Err(failure) => {
                    self.observer.on_event(&ResilienceEvent::AttemptFailed {
                        name: self.name.to_string(),
                        attempt,
                        error: failure.to_string(),
                    });

                    let retryable = match &failure {
                        ResilienceError::Operation(err) => (self.is_retryable)(err),
                        // A timed-out attempt says nothing about the
                        // dependency's answer; always worth another try.
                        _ => true,
                    };

                    if !retryable {
                        tracing::warn!(
                            call = self.name,
                            error = %failure,
                            "error is not retryable, failing immediately"
                        );
                        return Err(match failure {
                            ResilienceError::Operation(err) => ResilienceError::NonRetryable(err),
                            other => other,
                        });
                    }

                    if attempt >= self.policy.max_attempts {
                        tracing::error!(
                            call = self.name,
                            attempts = attempt,
                            error = %failure,
                            "operation failed after max attempts"
                        );
                        RetryMetrics::record_exhausted(self.name);
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(failure),
                        });
                    }

                    let next_attempt = attempt + 1;
                    let delay = self.policy.delay_for_attempt(next_attempt);
                    tracing::warn!(
                        call = self.name,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %failure,
                        "operation failed, retrying"
                    );
                    self.observer.on_event(&ResilienceEvent::RetryScheduled {
                        name: self.name.to_string(),
                        next_attempt,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });

                    if let Some(token) = self.cancellation {
                        tokio::select! {
                            () = token.cancelled() => {
                                tracing::debug!(call = self.name, "call cancelled during backoff");
                                return Err(ResilienceError::Cancelled);
                            }
                            () = sleep(delay) => {}
                        }
                    } else {
                        sleep(delay).await;
                    }

                    attempt = next_attempt;
                }
            }
        }
    }

    /// Run a single probe with no retries, surfacing the raw attempt
    /// failure. Used for the breaker's half-open trial, where hammering a
    /// recovering dependency with a retry sequence would defeat the point.
    pub async fn run_once<F, Fut, T, E>(&self, mut operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        RetryMetrics::record_attempt(self.name);
        match self.run_attempt(&mut operation).await {
            Ok(result) => Ok(result),
            Err(ResilienceError::Cancelled) => Err(ResilienceError::Cancelled),
            Err(failure) => {
                tracing::warn!(call = self.name, error = %failure, "trial attempt failed");
                self.observer.on_event(&ResilienceEvent::AttemptFailed {
                    name: self.name.to_string(),
                    attempt: 1,
                    error: failure.to_string(),
                });
                Err(failure)
            }
        }
    }

    /// Run a single attempt, applying the per-attempt timeout and racing
    /// the caller's cancellation token.
    async fn run_attempt<F, Fut, T, E>(&self, operation: &mut F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let timeout = self.attempt_timeout;
        let attempt = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result.map_err(ResilienceError::Operation),
                    Err(_) => Err(ResilienceError::AttemptTimeout(limit)),
                },
                None => operation().await.map_err(ResilienceError::Operation),
            }
        };

        match self.cancellation {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(ResilienceError::Cancelled),
                    result = attempt => result,
                }
            }
            None => attempt.await,
        }
    }
}

/// Retry an async operation with exponential backoff, treating every error
/// as retryable.
///
/// # Errors
///
/// Returns [`ResilienceError::RetriesExhausted`] wrapping the final
/// attempt's failure once the policy's attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    operation: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation, consulting `is_retryable` before each retry.
///
/// A rejected error short-circuits the remaining attempts.
///
/// # Errors
///
/// Returns [`ResilienceError::NonRetryable`] when the predicate rejects a
/// failure, or [`ResilienceError::RetriesExhausted`] once the attempt
/// budget is spent.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    operation: F,
    is_retryable: P,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let driver = AttemptDriver {
        name: "retry",
        policy: &policy,
        is_retryable: &is_retryable,
        attempt_timeout: None,
        cancellation: None,
        observer: &NoopObserver,
    };
    driver.run(operation).await
}
