//! Fallback stage: substitute a usable result when the primary path is
//! exhausted.
//!
//! A fallback runs only after the retry-wrapped, breaker-guarded chain has
//! produced a terminal failure: a cached value, a sentinel "unavailable"
//! response, whatever the embedding application can serve degraded. It is
//! never consulted on success.

use std::sync::Arc;

use futures::future::BoxFuture;
use steadfast_core::error::ResilienceError;

/// Produces a substitute `Result<T, E>` from the inner chain's terminal
/// error.
///
/// The provider may itself fail (the cache is down too); the executor
/// surfaces that as `FallbackFailed`, wrapping both errors.
pub struct Fallback<T, E> {
    provider: Arc<dyn Fn(&ResilienceError<E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync>,
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<T, E> Fallback<T, E> {
    /// Build a fallback from an async function of the triggering error.
    pub fn new<F, Fut>(provider: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            provider: Arc::new(move |err| Box::pin(provider(err))),
        }
    }

    /// Build a fallback that always supplies a fixed value, regardless of
    /// what failed.
    pub fn value(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: 'static,
    {
        Self::new(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Invoke the fallback with the inner chain's terminal error.
    ///
    /// # Errors
    ///
    /// Returns the provider's own error when the fallback path fails too.
    pub async fn invoke(&self, error: &ResilienceError<E>) -> Result<T, E> {
        (self.provider)(error).await
    }
}
