//! # Steadfast Testing
//!
//! Testing utilities and helpers for the Steadfast resilience library.
//!
//! This crate provides:
//! - Scripted fallible operations with exact invocation counting
//! - A recording observer that captures emitted events
//! - Tracing initialization for tests
//!
//! ## Example
//!
//! ```ignore
//! use steadfast_testing::mocks::FlakyOperation;
//! use steadfast_runtime::executor::ResilienceExecutor;
//!
//! #[tokio::test]
//! async fn recovers_from_transient_failures() {
//!     let op = FlakyOperation::fail_first(2);
//!     let executor = ResilienceExecutor::builder("dep")
//!         .build()
//!         .unwrap();
//!
//!     let result = executor.execute(|| op.call()).await;
//!     assert!(result.is_ok());
//!     assert_eq!(op.invocations(), 3);
//! }
//! ```

use std::sync::Mutex;

use steadfast_core::events::{ResilienceEvent, ResilienceObserver};

/// Mock operations and observers for exercising resilience behavior.
pub mod mocks {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A scripted operation that fails a fixed number of times before
    /// succeeding, counting every invocation.
    ///
    /// Clones share the same counter, so the same instance can be observed
    /// from the test while the executor drives it.
    #[derive(Debug, Clone)]
    pub struct FlakyOperation {
        fail_first: u32,
        invocations: Arc<AtomicU32>,
    }

    impl FlakyOperation {
        /// Fail the first `fail_first` invocations with a transient error,
        /// then succeed forever.
        #[must_use]
        pub fn fail_first(fail_first: u32) -> Self {
            Self {
                fail_first,
                invocations: Arc::new(AtomicU32::new(0)),
            }
        }

        /// Never succeed.
        #[must_use]
        pub fn always_failing() -> Self {
            Self::fail_first(u32::MAX)
        }

        /// Always succeed.
        #[must_use]
        pub fn always_succeeding() -> Self {
            Self::fail_first(0)
        }

        /// How many times the operation has been invoked.
        #[must_use]
        pub fn invocations(&self) -> u32 {
            self.invocations.load(Ordering::SeqCst)
        }

        /// Run one invocation. Returns the 1-based invocation number on
        /// success.
        ///
        /// # Errors
        ///
        /// Returns a transient error string while the scripted failures
        /// last.
        pub async fn call(&self) -> Result<u32, String> {
            let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
            if invocation <= self.fail_first {
                Err(format!("transient failure on invocation {invocation}"))
            } else {
                Ok(invocation)
            }
        }
    }
}

/// Observer that records every event it sees, in order.
///
/// Share it with an executor through an `Arc` and assert on
/// [`events`](RecordingObserver::events) afterwards.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<ResilienceEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResilienceObserver for RecordingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Initialize tracing for a test binary, honoring `RUST_LOG`.
///
/// Safe to call from every test; repeat initialization is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::FlakyOperation;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flaky_operation_fails_then_succeeds() {
        let op = FlakyOperation::fail_first(2);

        assert!(op.call().await.is_err());
        assert!(op.call().await.is_err());
        assert_eq!(op.call().await, Ok(3));
        assert_eq!(op.invocations(), 3);
    }

    #[tokio::test]
    async fn flaky_operation_clones_share_the_counter() {
        let op = FlakyOperation::always_succeeding();
        let clone = op.clone();

        let _ = op.call().await;
        let _ = clone.call().await;

        assert_eq!(op.invocations(), 2);
        assert_eq!(clone.invocations(), 2);
    }

    #[test]
    fn recording_observer_keeps_emission_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&ResilienceEvent::CircuitHalfOpened {
            name: "dep".to_string(),
        });
        observer.on_event(&ResilienceEvent::CircuitClosed {
            name: "dep".to_string(),
        });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ResilienceEvent::CircuitHalfOpened { .. }));
        assert!(matches!(events[1], ResilienceEvent::CircuitClosed { .. }));
    }
}
