//! Circuit breaker for calls to the shared session store.
//!
//! Every store call made by the session registry goes through
//! [`CircuitBreaker::call`], which enforces a per-call timeout and tracks
//! consecutive failures (a timeout counts as a failure).
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through. Failures are counted.
//! - **Open**: Too many consecutive failures. Calls are rejected immediately
//!   until `open_duration` has elapsed.
//! - **HalfOpen**: One probe call at a time is allowed, others are rejected;
//!   `success_threshold` successful probes close the circuit, a single
//!   failure reopens it.
//!
//! Rejection is cheap and synchronous with respect to the store, which is what
//! lets the session registry fail open without adding latency to logins while
//! the store is down.
//!
//! # Example
//!
//! ```rust
//! use district_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .failure_threshold(3)
//!         .call_timeout(Duration::from_millis(250))
//!         .build(),
//! );
//!
//! let value = breaker.call("get", || async { Ok::<_, String>(42) }).await;
//! assert!(value.is_ok());
//! # }
//! ```

use crate::metrics::names;
use metrics::{counter, gauge};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before probing again
    pub open_duration: Duration,
    /// Successful probes needed to close the circuit again
    pub success_threshold: usize,
    /// Upper bound for a single guarded call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(10),
            success_threshold: 1,
            call_timeout: Duration::from_millis(250),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures before the circuit opens.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// How long to reject calls before probing.
    #[must_use]
    pub const fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Successful probes needed to close the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Timeout applied to each guarded call.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls pass through normally
    Closed,
    /// Calls are rejected without reaching the store
    Open,
    /// Probe calls are allowed to test recovery
    HalfOpen,
}

impl State {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from guarded calls.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected without running
    #[error("Circuit breaker is open")]
    Open,
    /// Call did not finish within the configured timeout
    #[error("Call timed out after {0:?}")]
    TimedOut(Duration),
    /// Call ran and failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct Tracker {
    state: State,
    consecutive_failures: usize,
    probe_successes: usize,
    probe_in_flight: bool,
    opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Rejected,
    Normal,
    Probe,
}

/// Circuit breaker guarding one dependency.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    tracker: Arc<Mutex<Tracker>>,
    rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            tracker: Arc::new(Mutex::new(Tracker {
                state: State::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                probe_in_flight: false,
                opened_at: None,
            })),
            rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state of the circuit.
    pub async fn state(&self) -> State {
        self.tracker.lock().await.state
    }

    /// Number of calls rejected while open since construction.
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Run `operation` through the breaker with the configured timeout.
    ///
    /// `operation_name` labels the failure metrics.
    ///
    /// # Errors
    ///
    /// - `CircuitBreakerError::Open` if the circuit is open
    /// - `CircuitBreakerError::TimedOut` if the call exceeded `call_timeout`
    /// - `CircuitBreakerError::Inner` if the call itself failed
    pub async fn call<F, Fut, T, E>(
        &self,
        operation_name: &'static str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().await;
        if admission == Admission::Rejected {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            counter!(names::CIRCUIT_REJECTIONS, "operation" => operation_name).increment(1);
            return Err(CircuitBreakerError::Open);
        }

        match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success(admission).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(operation_name, admission).await;
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_) => {
                self.on_failure(operation_name, admission).await;
                Err(CircuitBreakerError::TimedOut(self.config.call_timeout))
            }
        }
    }

    /// Force the circuit closed.
    pub async fn reset(&self) {
        let mut tracker = self.tracker.lock().await;
        tracing::info!("Circuit breaker manually reset to CLOSED");
        *tracker = Tracker {
            state: State::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            probe_in_flight: false,
            opened_at: None,
        };
        gauge!(names::CIRCUIT_STATE).set(State::Closed.gauge_value());
    }

    async fn admit(&self) -> Admission {
        let mut tracker = self.tracker.lock().await;
        match tracker.state {
            State::Closed => Admission::Normal,
            State::HalfOpen if tracker.probe_in_flight => Admission::Rejected,
            State::HalfOpen => {
                tracker.probe_in_flight = true;
                Admission::Probe
            }
            State::Open => {
                let elapsed = tracker
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_duration);
                if !elapsed {
                    return Admission::Rejected;
                }
                tracing::info!("Circuit breaker transitioning OPEN -> HALF_OPEN");
                tracker.state = State::HalfOpen;
                tracker.probe_successes = 0;
                tracker.probe_in_flight = true;
                gauge!(names::CIRCUIT_STATE).set(State::HalfOpen.gauge_value());
                Admission::Probe
            }
        }
    }

    async fn on_success(&self, admission: Admission) {
        let mut tracker = self.tracker.lock().await;
        if admission == Admission::Probe {
            tracker.probe_in_flight = false;
        }
        match tracker.state {
            State::HalfOpen if admission == Admission::Probe => {
                tracker.probe_successes += 1;
                if tracker.probe_successes >= self.config.success_threshold {
                    tracing::info!("Circuit breaker transitioning HALF_OPEN -> CLOSED");
                    tracker.state = State::Closed;
                    tracker.consecutive_failures = 0;
                    tracker.opened_at = None;
                    gauge!(names::CIRCUIT_STATE).set(State::Closed.gauge_value());
                }
            }
            State::HalfOpen => {}
            State::Closed | State::Open => tracker.consecutive_failures = 0,
        }
    }

    async fn on_failure(&self, operation_name: &'static str, admission: Admission) {
        let mut tracker = self.tracker.lock().await;
        if admission == Admission::Probe {
            tracker.probe_in_flight = false;
        }
        tracker.consecutive_failures += 1;

        let trip = match tracker.state {
            State::Closed => tracker.consecutive_failures >= self.config.failure_threshold,
            State::HalfOpen => true,
            State::Open => false,
        };

        if trip {
            tracing::warn!(
                operation = operation_name,
                failures = tracker.consecutive_failures,
                "Circuit breaker transitioning to OPEN"
            );
            tracker.state = State::Open;
            tracker.opened_at = Some(Instant::now());
            tracker.probe_successes = 0;
            tracker.probe_in_flight = false;
            gauge!(names::CIRCUIT_STATE).set(State::Open.gauge_value());
        }
    }
}
