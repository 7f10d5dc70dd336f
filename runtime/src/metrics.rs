//! Prometheus metrics for resilience monitoring.
//!
//! Every component emits through the `metrics` facade unconditionally;
//! installing the exporter is the embedding application's choice. Metric
//! collection covers:
//!
//! - Aggregate call outcomes and latency per dependency
//! - Retry attempts and exhaustion
//! - Circuit breaker state, rejections
//! - Fallback invocations and double failures
//!
//! # Example
//!
//! ```rust,no_run
//! use steadfast_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render for scraping from the handle
//! let snapshot = server.render();
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

use crate::circuit_breaker::State;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the metrics exporter.
    #[error("failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the metrics exporter.
    #[error("failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder with a renderable handle.
///
/// Installs the global recorder once; the rendered output is served by
/// whatever HTTP surface the embedding application already runs.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for the given scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or
    /// installed. A recorder already installed by a previous instance (as
    /// happens in tests) is tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "metrics recorder installed, scrape endpoint ready"
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The configured scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` before [`start`](Self::start) succeeds.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Executor
    describe_counter!(
        "resilience_calls_total",
        "Aggregate calls executed, labeled by dependency and terminal outcome"
    );
    describe_histogram!(
        "resilience_call_duration_seconds",
        "Wall time of one aggregate call, attempts and backoff included"
    );

    // Retry
    describe_counter!(
        "retry_attempts_total",
        "Individual operation attempts, labeled by dependency"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Aggregate calls that spent their whole attempt budget"
    );

    // Circuit breaker
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls denied because the circuit was open"
    );

    // Fallback
    describe_counter!(
        "fallback_invocations_total",
        "Times the fallback was invoked after an exhausted primary path"
    );
    describe_counter!(
        "fallback_failures_total",
        "Times the fallback itself failed (double failure)"
    );
}

/// Executor metrics recorder.
pub struct ExecutorMetrics;

impl ExecutorMetrics {
    /// Record one aggregate call's terminal outcome and duration.
    pub fn record_call(name: &str, outcome: &'static str, duration: Duration) {
        counter!("resilience_calls_total", "call" => name.to_string(), "outcome" => outcome)
            .increment(1);
        histogram!("resilience_call_duration_seconds", "call" => name.to_string())
            .record(duration.as_secs_f64());
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record one operation attempt.
    pub fn record_attempt(name: &str) {
        counter!("retry_attempts_total", "call" => name.to_string()).increment(1);
    }

    /// Record an exhausted attempt budget.
    pub fn record_exhausted(name: &str) {
        counter!("retry_exhausted_total", "call" => name.to_string()).increment(1);
    }
}

/// Circuit breaker metrics recorder.
pub struct CircuitMetrics;

impl CircuitMetrics {
    /// Record a state transition.
    pub fn record_state(name: &str, state: State) {
        let value = match state {
            State::Closed => 0.0,
            State::HalfOpen => 1.0,
            State::Open => 2.0,
        };
        gauge!("circuit_breaker_state", "breaker" => name.to_string()).set(value);
    }

    /// Record a denied call.
    pub fn record_rejection(name: &str) {
        counter!("circuit_breaker_rejections_total", "breaker" => name.to_string()).increment(1);
    }
}

/// Fallback metrics recorder.
pub struct FallbackMetrics;

impl FallbackMetrics {
    /// Record a fallback invocation.
    pub fn record_invoked(name: &str) {
        counter!("fallback_invocations_total", "call" => name.to_string()).increment(1);
    }

    /// Record a fallback that failed too.
    pub fn record_failed(name: &str) {
        counter!("fallback_failures_total", "call" => name.to_string()).increment(1);
    }
}
