//! # Steadfast Runtime
//!
//! Execution layer for the Steadfast resilience library.
//!
//! Wraps arbitrary fallible async operations in retry, circuit-breaking,
//! and fallback behavior with one fixed composition order:
//! Fallback ⊃ CircuitBreaker ⊃ Retry ⊃ Operation.
//!
//! - [`retry`]: the attempt loop: backoff, retryable classification,
//!   per-attempt timeouts, cancellation
//! - [`circuit_breaker`]: consecutive-failure state machine with a lazy
//!   Open → HalfOpen transition and a single-trial guarantee
//! - [`fallback`]: degraded results when the primary path is exhausted
//! - [`executor`]: the composed pipeline, one aggregate breaker outcome
//!   per external call
//! - [`metrics`]: Prometheus emission for all of the above
//!
//! Policies and the error taxonomy live in `steadfast-core`; this crate
//! only executes.
//!
//! ## Example
//!
//! ```rust
//! use steadfast_core::policy::{CircuitBreakerConfig, RetryPolicy};
//! use steadfast_runtime::executor::ResilienceExecutor;
//! use steadfast_runtime::fallback::Fallback;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor: ResilienceExecutor<String, String> =
//!     ResilienceExecutor::builder("catalog")
//!         .retry_policy(
//!             RetryPolicy::builder()
//!                 .max_attempts(3)
//!                 .initial_delay(Duration::from_millis(100))
//!                 .build()?,
//!         )
//!         .circuit_breaker_config(
//!             CircuitBreakerConfig::builder()
//!                 .failure_threshold(5)
//!                 .break_duration(Duration::from_secs(30))
//!                 .build()?,
//!         )
//!         .fallback(Fallback::value("cached catalog".to_string()))
//!         .build()?;
//!
//! let listing = executor
//!     .execute(|| async { Ok::<_, String>("live catalog".to_string()) })
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod executor;
pub mod fallback;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics, Permit, State};
pub use executor::{ResilienceExecutor, ResilienceExecutorBuilder};
pub use fallback::Fallback;
pub use metrics::MetricsServer;
pub use retry::{retry_with_backoff, retry_with_predicate};
