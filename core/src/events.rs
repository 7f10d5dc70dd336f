//! Discrete events emitted during resilient call execution.
//!
//! The executor and circuit breaker report what happened through an
//! injected [`ResilienceObserver`]; where those events go (a metrics
//! system, a log pipeline, a test recorder) is the embedding application's
//! concern. Events serialize cleanly so observers can ship them as-is.

use serde::Serialize;

/// Something noteworthy that happened during a resilient call.
///
/// `name` identifies the executor or breaker that emitted the event: the
/// logical dependency being called. Wrapped errors are carried rendered,
/// since observers outlive any particular operation error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// A single attempt failed (it may still be retried).
    AttemptFailed {
        /// Emitting executor.
        name: String,
        /// 1-based attempt number that failed.
        attempt: u32,
        /// Rendered failure.
        error: String,
    },

    /// A retry was scheduled after a failed attempt.
    RetryScheduled {
        /// Emitting executor.
        name: String,
        /// 1-based number of the attempt about to run.
        next_attempt: u32,
        /// Backoff wait before that attempt, in milliseconds.
        delay_ms: u64,
    },

    /// The breaker tripped: consecutive failures reached the threshold.
    CircuitOpened {
        /// Emitting breaker.
        name: String,
        /// Consecutive failures at the moment of opening.
        consecutive_failures: u32,
    },

    /// The break duration elapsed; the next call becomes the trial.
    CircuitHalfOpened {
        /// Emitting breaker.
        name: String,
    },

    /// A trial call succeeded; normal operation resumed.
    CircuitClosed {
        /// Emitting breaker.
        name: String,
    },

    /// The inner chain failed and the configured fallback was invoked.
    FallbackInvoked {
        /// Emitting executor.
        name: String,
        /// Taxonomy kind of the failure that triggered the fallback.
        trigger: String,
    },
}

/// Receives [`ResilienceEvent`]s as they happen.
///
/// Implementations must be cheap and non-blocking; events are emitted
/// inline on the calling task.
pub trait ResilienceObserver: Send + Sync {
    /// Called once per event, in emission order per call.
    fn on_event(&self, event: &ResilienceEvent);
}

/// Observer that discards every event. The default when none is injected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {
    fn on_event(&self, _event: &ResilienceEvent) {}
}
