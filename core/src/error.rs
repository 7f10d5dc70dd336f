//! Error taxonomy for resilient call execution.
//!
//! Every terminal outcome of a resilient call is one of the
//! [`ResilienceError`] kinds, distinguishable by variant, not by string
//! matching. Construction-time misconfiguration is a separate type
//! ([`ConfigError`]) so that bad policies fail loudly at setup rather than
//! at call time.

use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a resilient call.
///
/// Generic over `E`, the wrapped operation's own error type. The executor
/// never converts these into strings; callers match on the variant they
/// care about.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The wrapped operation's own failure.
    #[error("operation failed: {0}")]
    Operation(E),

    /// A single attempt exceeded its allotted time.
    #[error("attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// The retryable-error classifier rejected the failure; remaining
    /// attempts were short-circuited.
    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    /// Every permitted attempt failed with a retryable error.
    ///
    /// `last` preserves the final attempt's failure, which is always an
    /// [`ResilienceError::Operation`] or [`ResilienceError::AttemptTimeout`].
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// How many attempts were made (equals the policy's `max_attempts`).
        attempts: u32,
        /// The final attempt's failure.
        last: Box<ResilienceError<E>>,
    },

    /// The circuit breaker denied the call; the operation was not invoked.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller abandoned the call. Never counted toward breaker
    /// thresholds and never substituted by a fallback.
    #[error("call cancelled")]
    Cancelled,

    /// The fallback itself failed after the primary path was exhausted.
    ///
    /// Both failures are preserved; a double failure is never swallowed.
    #[error("fallback failed: {fallback} (primary failure: {primary})")]
    FallbackFailed {
        /// The inner-chain failure that triggered the fallback.
        primary: Box<ResilienceError<E>>,
        /// The fallback's own failure.
        fallback: E,
    },
}

impl<E> ResilienceError<E> {
    /// Stable lowercase label for this kind, suitable for metric and log
    /// field values.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Operation(_) => "operation",
            Self::AttemptTimeout(_) => "attempt_timeout",
            Self::NonRetryable(_) => "non_retryable",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::FallbackFailed { .. } => "fallback_failed",
        }
    }

    /// True when the breaker denied the call without invoking the operation.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// True when the caller abandoned the call.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Construction-time policy misconfiguration.
///
/// Returned by the policy builders; nothing here can surface during a call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `max_attempts` must be at least 1 (attempt 1 is the initial try).
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// The backoff multiplier must be a finite value of at least 1.0.
    #[error("backoff multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// Jitter is a fraction of the computed delay.
    #[error("jitter must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),

    /// A backoff schedule that shrinks below its starting point is a
    /// configuration mistake, not a runtime condition.
    #[error("max_delay {max_delay:?} must not be shorter than initial_delay {initial_delay:?}")]
    DelayRange {
        /// Configured initial delay.
        initial_delay: Duration,
        /// Configured delay cap.
        max_delay: Duration,
    },

    /// `failure_threshold` must be at least 1.
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    /// A zero `break_duration` would re-admit traffic immediately.
    #[error("break_duration must be non-zero")]
    ZeroBreakDuration,
}
