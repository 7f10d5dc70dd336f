//! The resilience executor: retry, circuit breaker, and fallback wired
//! together in one fixed, caller-invisible order.
//!
//! Per invocation the wrap order is Fallback ⊃ CircuitBreaker ⊃ Retry ⊃
//! Operation:
//!
//! 1. Breaker admission first; retry is never attempted against an open
//!    circuit.
//! 2. The whole retry sequence runs inside the breaker's single logical
//!    call, so the breaker records one aggregate outcome per external
//!    call, no matter how many attempts ran inside.
//! 3. Only a terminal failure reaches the fallback; success returns
//!    directly.
//!
//! Cancellation is the one outcome that records nothing: an impatient
//! caller must not trip the breaker for everyone else.
//!
//! # Example
//!
//! ```rust
//! use steadfast_core::policy::{CircuitBreakerConfig, RetryPolicy};
//! use steadfast_runtime::executor::ResilienceExecutor;
//! use steadfast_runtime::fallback::Fallback;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor: ResilienceExecutor<String, String> =
//!     ResilienceExecutor::builder("inventory")
//!         .retry_policy(RetryPolicy::exponential())
//!         .retry_on(|err: &String| err.contains("transient"))
//!         .circuit_breaker_config(CircuitBreakerConfig::default())
//!         .fallback(Fallback::value("unavailable".to_string()))
//!         .build()?;
//!
//! let result = executor
//!     .execute(|| async { Ok::<_, String>("fresh".to_string()) })
//!     .await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use steadfast_core::error::{ConfigError, ResilienceError};
use steadfast_core::events::{NoopObserver, ResilienceEvent, ResilienceObserver};
use steadfast_core::policy::{CircuitBreakerConfig, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreaker;
use crate::fallback::Fallback;
use crate::metrics::{ExecutorMetrics, FallbackMetrics};
use crate::retry::AttemptDriver;

/// Executes operations against one logical dependency with retry,
/// circuit-breaking, and fallback.
///
/// `T` is the operation's success type, `E` its error type. The executor
/// is cheap to clone and safe to share across tasks; clones share the
/// same circuit breaker.
pub struct ResilienceExecutor<T, E> {
    name: Arc<str>,
    retry_policy: RetryPolicy,
    is_retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    attempt_timeout: Option<Duration>,
    breaker: CircuitBreaker,
    fallback: Option<Fallback<T, E>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<T, E> Clone for ResilienceExecutor<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            retry_policy: self.retry_policy.clone(),
            is_retryable: Arc::clone(&self.is_retryable),
            attempt_timeout: self.attempt_timeout,
            breaker: self.breaker.clone(),
            fallback: self.fallback.clone(),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<T, E> ResilienceExecutor<T, E> {
    /// Start building an executor for the named dependency.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ResilienceExecutorBuilder<T, E> {
        ResilienceExecutorBuilder {
            name: name.into(),
            retry_policy: RetryPolicy::exponential(),
            is_retryable: Arc::new(|_| true),
            attempt_timeout: None,
            breaker: None,
            breaker_config: CircuitBreakerConfig::default(),
            fallback: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// The logical dependency this executor calls.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The circuit breaker guarding this executor's dependency.
    #[must_use]
    pub const fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<T, E> ResilienceExecutor<T, E>
where
    E: std::fmt::Display,
{
    /// Run one aggregate call through the full policy chain.
    ///
    /// # Errors
    ///
    /// With no fallback configured, returns the taxonomy error of the
    /// inner chain ([`ResilienceError::CircuitOpen`],
    /// [`ResilienceError::RetriesExhausted`],
    /// [`ResilienceError::NonRetryable`], or
    /// [`ResilienceError::AttemptTimeout`] wrapped in exhaustion). With a
    /// fallback, only [`ResilienceError::FallbackFailed`] can surface.
    pub async fn execute<F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but abandons the call when `cancellation`
    /// fires.
    ///
    /// A cancelled call stops in-flight attempts and backoff waits
    /// promptly, never counts toward the breaker's threshold, and is never
    /// substituted by the fallback.
    ///
    /// # Errors
    ///
    /// [`ResilienceError::Cancelled`] once the token fires; otherwise as
    /// [`execute`](Self::execute).
    pub async fn execute_cancellable<F, Fut>(
        &self,
        operation: F,
        cancellation: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, Some(cancellation)).await
    }

    async fn run<F, Fut>(
        &self,
        operation: F,
        cancellation: Option<&CancellationToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let outcome = self.run_chain(operation, cancellation).await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        ExecutorMetrics::record_call(&self.name, label, started.elapsed());
        outcome
    }

    async fn run_chain<F, Fut>(
        &self,
        operation: F,
        cancellation: Option<&CancellationToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.breaker.try_acquire().await else {
            return self.apply_fallback(ResilienceError::CircuitOpen).await;
        };

        let driver = AttemptDriver {
            name: &self.name,
            policy: &self.retry_policy,
            is_retryable: &*self.is_retryable,
            attempt_timeout: self.attempt_timeout,
            cancellation,
            observer: self.observer.as_ref(),
        };

        // A half-open trial is a single probe; a recovering dependency is
        // not hammered with a retry sequence, and a failed trial surfaces
        // the underlying error rather than an exhaustion wrapper.
        let outcome = if permit.is_trial() {
            driver.run_once(operation).await
        } else {
            driver.run(operation).await
        };

        match outcome {
            Ok(value) => {
                self.breaker.record_success(permit).await;
                Ok(value)
            }
            Err(ResilienceError::Cancelled) => {
                // Not a failure: free a trial slot, touch nothing else.
                self.breaker.release(permit).await;
                Err(ResilienceError::Cancelled)
            }
            Err(failure) => {
                self.breaker.record_failure(permit).await;
                self.apply_fallback(failure).await
            }
        }
    }

    async fn apply_fallback(&self, failure: ResilienceError<E>) -> Result<T, ResilienceError<E>> {
        let Some(fallback) = &self.fallback else {
            return Err(failure);
        };

        tracing::info!(
            call = %self.name,
            trigger = failure.kind(),
            "primary path exhausted, invoking fallback"
        );
        FallbackMetrics::record_invoked(&self.name);
        self.observer.on_event(&ResilienceEvent::FallbackInvoked {
            name: self.name.to_string(),
            trigger: failure.kind().to_string(),
        });

        match fallback.invoke(&failure).await {
            Ok(value) => Ok(value),
            Err(fallback_error) => {
                tracing::error!(
                    call = %self.name,
                    primary = %failure,
                    fallback = %fallback_error,
                    "fallback failed after primary failure"
                );
                FallbackMetrics::record_failed(&self.name);
                Err(ResilienceError::FallbackFailed {
                    primary: Box::new(failure),
                    fallback: fallback_error,
                })
            }
        }
    }
}

/// Builder for [`ResilienceExecutor`].
pub struct ResilienceExecutorBuilder<T, E> {
    name: String,
    retry_policy: RetryPolicy,
    is_retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    attempt_timeout: Option<Duration>,
    breaker: Option<CircuitBreaker>,
    breaker_config: CircuitBreakerConfig,
    fallback: Option<Fallback<T, E>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<T, E> ResilienceExecutorBuilder<T, E> {
    /// Set the retry policy. Defaults to [`RetryPolicy::exponential`].
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Classify which operation errors are worth retrying. Defaults to
    /// retrying everything.
    #[must_use]
    pub fn retry_on<P>(mut self, is_retryable: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(is_retryable);
        self
    }

    /// Bound each individual attempt; exceeding it counts as a retryable
    /// failure (`AttemptTimeout`). No bound by default.
    #[must_use]
    pub const fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Share an existing breaker with other executors calling the same
    /// dependency. Takes precedence over
    /// [`circuit_breaker_config`](Self::circuit_breaker_config).
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Configure a private breaker owned by this executor. Ignored when a
    /// breaker is injected via [`circuit_breaker`](Self::circuit_breaker).
    #[must_use]
    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Supply a degraded result when the primary path is exhausted. No
    /// fallback by default: taxonomy errors propagate to the caller.
    #[must_use]
    pub fn fallback(mut self, fallback: Fallback<T, E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Receive discrete events (attempt failures, state transitions,
    /// fallback invocations). Defaults to a no-op.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate every policy and build the executor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the retry policy or breaker
    /// configuration violates its invariants; misconfiguration surfaces
    /// here, never during a call.
    pub fn build(self) -> Result<ResilienceExecutor<T, E>, ConfigError> {
        self.retry_policy.validate()?;
        let breaker = match self.breaker {
            Some(breaker) => breaker,
            None => CircuitBreaker::with_observer(
                self.name.clone(),
                self.breaker_config,
                Arc::clone(&self.observer),
            )?,
        };

        Ok(ResilienceExecutor {
            name: Arc::from(self.name),
            retry_policy: self.retry_policy,
            is_retryable: self.is_retryable,
            attempt_timeout: self.attempt_timeout,
            breaker,
            fallback: self.fallback,
            observer: self.observer,
        })
    }
}
