//! # District Runtime
//!
//! Runtime guards and observability shared by the district session services.
//!
//! - [`circuit_breaker`]: wraps every call to the shared session store with a
//!   short timeout and trips open when the store keeps failing, so callers can
//!   fail open immediately instead of queueing behind a dead dependency
//! - [`metrics`]: metric names, descriptions and the Prometheus exporter

/// Circuit breaker with per-call timeouts for shared-store calls
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use metrics::MetricsServer;
