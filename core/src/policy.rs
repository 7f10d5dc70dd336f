//! Retry and circuit-breaker policy configuration.
//!
//! Policies are immutable configuration: built once at service startup,
//! validated at construction, then shared read-only across every call.
//! Anything invalid fails in `build()`, never at call time.
//!
//! # Example
//!
//! ```
//! use steadfast_core::policy::{CircuitBreakerConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), steadfast_core::error::ConfigError> {
//! let retry = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build()?;
//!
//! let breaker = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .break_duration(Duration::from_secs(30))
//!     .build()?;
//!
//! // First retry after 100ms, then 200ms, 400ms, ... capped at 10s.
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(100));
//! assert_eq!(breaker.failure_threshold, 5);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for retrying a fallible operation.
///
/// Attempt 1 is the initial try, not a retry: `max_attempts = 1` means a
/// single attempt with no waiting. Delays grow exponentially by
/// `multiplier`, capped at `max_delay`, with optional jitter to avoid
/// thundering herds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial try. At least 1.
    pub max_attempts: u32,

    /// Delay before the first retry (attempt 2).
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap on the delay between attempts.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 doubles the delay each retry).
    pub multiplier: f64,

    /// Jitter as a fraction of the computed delay (0.0..=1.0). 0.1 means
    /// ±10% randomness; 0.0 keeps delays deterministic.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults: 3 attempts, 100ms
    /// initial delay, 30s cap, 2x multiplier, no jitter.
    #[must_use]
    pub const fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// A policy that never retries: single attempt, no waiting.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Fixed-interval retries (no backoff growth).
    #[must_use]
    pub const fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Check the policy's invariants.
    ///
    /// Deserialized policies bypass the builder; the executor re-validates
    /// them here before accepting one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_attempts` is 0, the multiplier is
    /// not finite or below 1.0, jitter is outside 0.0..=1.0, or the delay cap
    /// is shorter than the initial delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::DelayRange {
                initial_delay: self.initial_delay,
                max_delay: self.max_delay,
            });
        }
        Ok(())
    }

    /// Delay to wait before the given attempt number (1-based).
    ///
    /// Attempt 1 runs immediately. The delay before attempt k (k ≥ 2) is
    /// `initial_delay * multiplier^(k-2)`, capped at `max_delay`, then
    /// jittered.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of attempts, including the initial try.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap on the delay between attempts.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (0.0..=1.0).
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build and validate the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the invariant violations listed on
    /// [`RetryPolicy::validate`].
    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        let policy = RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Configuration for a circuit breaker.
///
/// The breaker counts exact consecutive failures, with no smoothing or
/// windowing. After `failure_threshold` consecutive failures it opens and
/// denies calls for `break_duration` before permitting a single trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit. At least 1.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is permitted.
    #[serde(with = "duration_millis")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }

    /// Check the configuration's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `failure_threshold` is 0 or
    /// `break_duration` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::ZeroBreakDuration);
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    break_duration: Duration,
}

impl CircuitBreakerConfigBuilder {
    /// Set how many consecutive failures open the circuit.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before a trial call.
    #[must_use]
    pub const fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the invariant violations listed on
    /// [`CircuitBreakerConfig::validate`].
    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            break_duration: self.break_duration,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
