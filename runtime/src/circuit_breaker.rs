//! Circuit breaker for failing fast against a known-bad dependency.
//!
//! One breaker instance guards one logical dependency and is shared by
//! every caller of that dependency (the handle is cheaply cloneable).
//! Failure counting is an exact consecutive counter, with no smoothing or
//! windowing.
//!
//! # States
//!
//! - **Closed**: normal operation, calls pass through; a success resets the
//!   consecutive-failure counter.
//! - **Open**: calls are denied immediately without invoking the operation.
//!   The Open → HalfOpen transition is lazy: it happens when a call arrives
//!   after `break_duration` has elapsed, not on a background timer.
//! - **HalfOpen**: exactly one trial call is admitted; everyone else is
//!   denied until the trial resolves. Trial success closes the circuit,
//!   trial failure re-opens it with a fresh timer.
//!
//! # Example
//!
//! ```rust
//! use steadfast_core::policy::CircuitBreakerConfig;
//! use steadfast_runtime::circuit_breaker::CircuitBreaker;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .break_duration(Duration::from_secs(30))
//!     .build()?;
//!
//! let breaker = CircuitBreaker::new("payments", config)?;
//!
//! match breaker.call(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("success: {result}"),
//!     Err(e) => println!("failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use steadfast_core::error::{ConfigError, ResilienceError};
use steadfast_core::events::{NoopObserver, ResilienceEvent, ResilienceObserver};
use steadfast_core::policy::CircuitBreakerConfig;
use tokio::sync::RwLock;

use crate::metrics::CircuitMetrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Normal operation, calls pass through.
    Closed,
    /// Dependency assumed down, calls fail fast.
    Open,
    /// Testing recovery with a single trial call.
    HalfOpen,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Admission token for one aggregate call.
///
/// Obtained from [`CircuitBreaker::try_acquire`] and handed back through
/// exactly one of [`record_success`](CircuitBreaker::record_success),
/// [`record_failure`](CircuitBreaker::record_failure), or
/// [`release`](CircuitBreaker::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    trial: bool,
}

impl Permit {
    /// True when this call is the single HalfOpen trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Everything guarded by the breaker's lock. Transitions are a single
/// read-modify-write under the write guard, so concurrent reports cannot
/// corrupt the counter or admit a second trial.
#[derive(Debug)]
struct BreakerState {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one logical dependency.
///
/// Cloning produces another handle to the same shared state, the way one
/// breaker is shared across every concurrent caller of a dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
    observer: Arc<dyn ResilienceObserver>,
    // Lifetime counters
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a breaker with a validated configuration and no observer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration violates its
    /// invariants (see [`CircuitBreakerConfig::validate`]).
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_observer(name, config, Arc::new(NoopObserver))
    }

    /// Create a breaker that reports state transitions to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration violates its
    /// invariants.
    pub fn with_observer(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: Arc::from(name.into()),
            config,
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
            observer,
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The dependency this breaker guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, with the lazy Open → HalfOpen transition *not*
    /// applied; that only happens at admission time.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Current consecutive-failure count.
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    /// Decide whether a call may proceed.
    ///
    /// Returns a [`Permit`] when admitted, `None` when the call must fail
    /// fast with `CircuitOpen`. Arriving after the break duration elapses
    /// performs the Open → HalfOpen transition and claims the trial slot.
    pub async fn try_acquire(&self) -> Option<Permit> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let (admitted, event) = {
            let mut guard = self.state.write().await;
            match guard.state {
                State::Closed => (Some(Permit { trial: false }), None),
                State::Open => {
                    let expired = guard
                        .opened_at
                        .is_some_and(|opened| opened.elapsed() >= self.config.break_duration);
                    if expired {
                        guard.state = State::HalfOpen;
                        guard.trial_in_flight = true;
                        tracing::info!(breaker = %self.name, "circuit breaker transitioning open -> half_open");
                        CircuitMetrics::record_state(&self.name, State::HalfOpen);
                        (
                            Some(Permit { trial: true }),
                            Some(ResilienceEvent::CircuitHalfOpened {
                                name: self.name.to_string(),
                            }),
                        )
                    } else {
                        (None, None)
                    }
                }
                State::HalfOpen => {
                    if guard.trial_in_flight {
                        (None, None)
                    } else {
                        // A cancelled trial released its slot; this caller
                        // becomes the new trial.
                        guard.trial_in_flight = true;
                        (Some(Permit { trial: true }), None)
                    }
                }
            }
        };

        if let Some(event) = event {
            self.observer.on_event(&event);
        }
        if admitted.is_none() {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            CircuitMetrics::record_rejection(&self.name);
            tracing::warn!(breaker = %self.name, "circuit breaker is open, rejecting call");
        }
        admitted
    }

    /// Report that the admitted call (the whole aggregate, retries
    /// included) succeeded.
    pub async fn record_success(&self, permit: Permit) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let event = {
            let mut guard = self.state.write().await;
            match guard.state {
                State::Closed => {
                    guard.consecutive_failures = 0;
                    None
                }
                State::HalfOpen if permit.trial => {
                    guard.state = State::Closed;
                    guard.consecutive_failures = 0;
                    guard.opened_at = None;
                    guard.trial_in_flight = false;
                    tracing::info!(breaker = %self.name, "circuit breaker transitioning half_open -> closed (recovered)");
                    CircuitMetrics::record_state(&self.name, State::Closed);
                    Some(ResilienceEvent::CircuitClosed {
                        name: self.name.to_string(),
                    })
                }
                // A stale report from a call admitted before the state
                // changed; the trial (or the timer) decides, not this call.
                State::HalfOpen | State::Open => None,
            }
        };

        if let Some(event) = event {
            self.observer.on_event(&event);
        }
    }

    /// Report that the admitted call (the whole aggregate) failed.
    pub async fn record_failure(&self, permit: Permit) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let event = {
            let mut guard = self.state.write().await;
            match guard.state {
                State::Closed => {
                    guard.consecutive_failures += 1;
                    if guard.consecutive_failures >= self.config.failure_threshold {
                        guard.state = State::Open;
                        guard.opened_at = Some(Instant::now());
                        tracing::warn!(
                            breaker = %self.name,
                            failures = guard.consecutive_failures,
                            threshold = self.config.failure_threshold,
                            "circuit breaker transitioning closed -> open"
                        );
                        CircuitMetrics::record_state(&self.name, State::Open);
                        Some(ResilienceEvent::CircuitOpened {
                            name: self.name.to_string(),
                            consecutive_failures: guard.consecutive_failures,
                        })
                    } else {
                        None
                    }
                }
                State::HalfOpen if permit.trial => {
                    guard.state = State::Open;
                    guard.opened_at = Some(Instant::now());
                    guard.trial_in_flight = false;
                    tracing::warn!(breaker = %self.name, "circuit breaker transitioning half_open -> open (trial failed)");
                    CircuitMetrics::record_state(&self.name, State::Open);
                    Some(ResilienceEvent::CircuitOpened {
                        name: self.name.to_string(),
                        consecutive_failures: guard.consecutive_failures,
                    })
                }
                // Stale report; see record_success.
                State::HalfOpen | State::Open => None,
            }
        };

        if let Some(event) = event {
            self.observer.on_event(&event);
        }
    }

    /// Hand back a permit without reporting an outcome.
    ///
    /// Used for cancelled calls: a cancelled call is not a failure, so it
    /// must not move the counter or the state, but a cancelled *trial*
    /// must free the trial slot, or the breaker would stay HalfOpen with
    /// no trial forever.
    pub async fn release(&self, permit: Permit) {
        if !permit.trial {
            return;
        }
        let mut guard = self.state.write().await;
        if guard.state == State::HalfOpen {
            guard.trial_in_flight = false;
        }
    }

    /// Run one operation through the breaker.
    ///
    /// Convenience for standalone use; the executor drives
    /// acquire/record directly so that a whole retry sequence counts as
    /// one call.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] when the call is denied
    /// without invoking the operation, or
    /// [`ResilienceError::Operation`] carrying the operation's own error.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire().await else {
            return Err(ResilienceError::CircuitOpen);
        };

        match operation().await {
            Ok(result) => {
                self.record_success(permit).await;
                Ok(result)
            }
            Err(err) => {
                self.record_failure(permit).await;
                Err(ResilienceError::Operation(err))
            }
        }
    }

    /// Lifetime counters for monitoring.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to Closed. For tests and manual
    /// intervention.
    pub async fn reset(&self) {
        let mut guard = self.state.write().await;
        tracing::info!(breaker = %self.name, "circuit breaker manually reset to closed");
        guard.state = State::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
        guard.trial_in_flight = false;
        CircuitMetrics::record_state(&self.name, State::Closed);
    }
}

/// Lifetime counter snapshot for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached admission (granted or denied).
    pub total_calls: u64,
    /// Aggregate calls reported as success.
    pub total_successes: u64,
    /// Aggregate calls reported as failure.
    pub total_failures: u64,
    /// Calls denied with `CircuitOpen`.
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Fraction of admitted-or-denied calls that succeeded (1.0 when idle).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }

    /// Fraction of calls denied with `CircuitOpen`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn breaker(threshold: u32, break_duration: Duration) -> CircuitBreaker {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .break_duration(break_duration)
            .build()
            .unwrap();
        CircuitBreaker::new("test", config).unwrap()
    }

    async fn trip(cb: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            let _ = cb.call(|| async { Err::<i32, _>("error") }).await;
        }
    }

    #[tokio::test]
    async fn starts_closed_and_passes_calls() {
        let cb = breaker(5, Duration::from_secs(30));
        let result = cb.call(|| async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(cb.state().await, State::Closed);
    }

    #[tokio::test]
    async fn rejects_zero_failure_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            break_duration: Duration::from_secs(1),
        };
        assert!(CircuitBreaker::new("bad", config).is_err());
    }

    #[tokio::test]
    async fn opens_after_exact_threshold() {
        let cb = breaker(3, Duration::from_secs(30));

        trip(&cb, 2).await;
        assert_eq!(cb.state().await, State::Closed);
        assert_eq!(cb.consecutive_failures().await, 2);

        trip(&cb, 1).await;
        assert_eq!(cb.state().await, State::Open);
    }

    #[tokio::test]
    async fn open_circuit_denies_without_invoking() {
        let cb = breaker(2, Duration::from_secs(30));
        trip(&cb, 2).await;

        let invoked = AtomicUsize::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30));
        trip(&cb, 2).await;
        assert_eq!(cb.consecutive_failures().await, 2);

        let _ = cb.call(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(cb.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_break() {
        let cb = breaker(2, Duration::from_millis(50));
        trip(&cb, 2).await;
        assert_eq!(cb.state().await, State::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let permit = cb.try_acquire().await;
        match permit {
            Some(permit) => assert!(permit.is_trial()),
            None => panic!("expected the post-break call to be admitted as the trial"),
        }
        assert_eq!(cb.state().await, State::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_trial() {
        let cb = breaker(2, Duration::from_millis(50));
        trip(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let trial = cb.try_acquire().await;
        assert!(trial.is_some());

        // The trial has not resolved; everyone else is denied immediately.
        assert!(cb.try_acquire().await.is_none());
        assert!(cb.try_acquire().await.is_none());
    }

    #[tokio::test]
    async fn successful_trial_closes_and_fully_resets() {
        let cb = breaker(2, Duration::from_millis(50));
        trip(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = cb.call(|| async { Ok::<_, String>(1) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state().await, State::Closed);

        // Re-opening takes the full threshold again, not threshold - 1.
        trip(&cb, 1).await;
        assert_eq!(cb.state().await, State::Closed);
        trip(&cb, 1).await;
        assert_eq!(cb.state().await, State::Open);
    }

    #[tokio::test]
    async fn failed_trial_reopens_with_fresh_timer() {
        let cb = breaker(2, Duration::from_millis(60));
        trip(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(90)).await;

        let result = cb.call(|| async { Err::<i32, _>("still down") }).await;
        assert!(matches!(result, Err(ResilienceError::Operation(_))));
        assert_eq!(cb.state().await, State::Open);

        // Fresh timer: a call right after the failed trial is denied.
        assert!(cb.try_acquire().await.is_none());

        // And admitted again once the new break elapses.
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(cb.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn released_trial_frees_the_slot() {
        let cb = breaker(2, Duration::from_millis(50));
        trip(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let trial = cb.try_acquire().await.unwrap();
        assert!(cb.try_acquire().await.is_none());

        cb.release(trial).await;
        assert_eq!(cb.state().await, State::HalfOpen);
        assert_eq!(cb.consecutive_failures().await, 2);

        // The next arrival becomes the new trial.
        let next = cb.try_acquire().await.unwrap();
        assert!(next.is_trial());
    }

    #[tokio::test]
    async fn stale_reports_do_not_disturb_open_state() {
        let cb = breaker(2, Duration::from_secs(30));

        // Admitted while closed, resolves after the circuit opened.
        let early = cb.try_acquire().await.unwrap();
        trip(&cb, 2).await;
        assert_eq!(cb.state().await, State::Open);

        cb.record_success(early).await;
        assert_eq!(cb.state().await, State::Open);
    }

    #[tokio::test]
    async fn lifetime_metrics_track_outcomes() {
        let cb = breaker(2, Duration::from_secs(30));

        for _ in 0..3 {
            let _ = cb.call(|| async { Ok::<_, String>(1) }).await;
        }
        trip(&cb, 2).await;
        let _ = cb.call(|| async { Ok::<_, String>(1) }).await; // denied

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 6);
        assert_eq!(metrics.total_successes, 3);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.total_rejections, 1);
        assert!(metrics.success_rate() > 0.49);
        assert!(metrics.rejection_rate() > 0.16);
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let cb = breaker(2, Duration::from_secs(30));
        trip(&cb, 2).await;
        assert_eq!(cb.state().await, State::Open);

        cb.reset().await;
        assert_eq!(cb.state().await, State::Closed);
        assert_eq!(cb.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn concurrent_successes_keep_counters_exact() {
        let cb = breaker(5, Duration::from_secs(30));
        let invoked = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let cb = cb.clone();
            let invoked = Arc::clone(&invoked);
            handles.push(tokio::spawn(async move {
                let _ = cb
                    .call(|| async {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.ok();
        }

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 100);
        assert_eq!(metrics.total_successes, 100);
        assert_eq!(invoked.load(Ordering::SeqCst), 100);
    }
}
