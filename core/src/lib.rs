//! # Steadfast Core
//!
//! Core types for the Steadfast resilience library.
//!
//! This crate holds everything that is pure configuration or contract;
//! no execution lives here:
//!
//! - **Policies**: validated, immutable retry and circuit-breaker
//!   configuration ([`RetryPolicy`], [`CircuitBreakerConfig`])
//! - **Errors**: the taxonomy of terminal call outcomes
//!   ([`ResilienceError`]) and construction-time misconfiguration
//!   ([`ConfigError`])
//! - **Observer surface**: discrete events and the trait observers
//!   implement ([`ResilienceEvent`], [`ResilienceObserver`])
//!
//! Execution (the retry loop, the breaker state machine, and the
//! composed executor) lives in `steadfast-runtime`.
//!
//! ## Design Principles
//!
//! - Policies are created once at startup and shared read-only
//! - Misconfiguration fails at `build()`, never at call time
//! - Terminal outcomes are distinguishable variants, not strings
//! - Telemetry is a seam: the library emits, the application sinks

pub mod error;
pub mod events;
pub mod policy;

pub use error::{ConfigError, ResilienceError};
pub use events::{NoopObserver, ResilienceEvent, ResilienceObserver};
pub use policy::{CircuitBreakerConfig, RetryPolicy};
