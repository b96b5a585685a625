//! Circuit-breaker wrapper around the shared store.

use crate::error::{Result, SessionError};
use crate::providers::SessionStore;
use district_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use district_runtime::metrics::{counter, names};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A store whose every call runs through one circuit breaker.
pub(crate) struct GuardedStore<S> {
    store: Arc<S>,
    breaker: CircuitBreaker,
}

impl<S> Clone for GuardedStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            breaker: self.breaker.clone(),
        }
    }
}

impl<S: SessionStore> GuardedStore<S> {
    pub(crate) fn new(store: Arc<S>, call_timeout: Duration) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(
                CircuitBreakerConfig::builder()
                    .call_timeout(call_timeout)
                    .build(),
            ),
        }
    }

    /// The unguarded store, for long-lived calls such as subscriptions.
    pub(crate) const fn inner(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one store call with timeout and breaker accounting.
    ///
    /// Store failures are counted under `operation`; callers decide how to
    /// log them.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = Arc::clone(&self.store);
        let result = self
            .breaker
            .call(operation, move || f(store))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open => SessionError::CircuitOpen,
                CircuitBreakerError::TimedOut(_) => SessionError::StoreTimeout { operation },
                CircuitBreakerError::Inner(inner) => inner,
            });

        if let Err(e) = &result {
            if e.is_store_failure() {
                counter!(names::STORE_FAILURES, "operation" => operation).increment(1);
            }
        }
        result
    }
}
