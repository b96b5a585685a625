//! Prometheus metrics for the session services.
//!
//! Metric names live in [`names`] so the recorders in the session crate and
//! the descriptions registered here cannot drift apart.
//!
//! # Example
//!
//! ```rust,no_run
//! use district_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Sessions registered in the local index.
    pub const SESSIONS_REGISTERED: &str = "session_registrations_total";
    /// Sessions evicted by the concurrent-login policy.
    pub const SESSIONS_EVICTED: &str = "session_evictions_total";
    /// Logins rejected because the principal had too many sessions.
    pub const LOGINS_REJECTED: &str = "session_logins_rejected_total";
    /// Logins allowed without enforcement because the store was unreachable.
    pub const ENFORCEMENT_SKIPPED: &str = "session_enforcement_skipped_total";
    /// Sessions that left `Active` for a reason other than eviction (`cause` label).
    pub const SESSIONS_EXPIRED: &str = "session_expirations_total";
    /// Cold-cache reconciliations (`source` label: `index` or `scan`).
    pub const RECONCILIATIONS: &str = "session_reconciliations_total";
    /// Reconciliations cut short by their deadline.
    pub const RECONCILIATIONS_PARTIAL: &str = "session_reconciliations_partial_total";
    /// Store entries skipped during reconciliation because they did not decode.
    pub const RECONCILIATION_SKIPPED_ENTRIES: &str = "session_reconciliation_skipped_entries_total";
    /// Time spent reconciling one principal.
    pub const RECONCILIATION_DURATION: &str = "session_reconciliation_duration_seconds";
    /// Failed or timed-out store calls (`operation` label).
    pub const STORE_FAILURES: &str = "session_store_failures_total";
    /// Audit events that could not be published.
    pub const AUDIT_PUBLISH_FAILURES: &str = "session_audit_publish_failures_total";
    /// Entries currently held in the local session index.
    pub const LOCAL_INDEX_SIZE: &str = "session_local_index_size";
    /// Circuit breaker state (0=closed, 1=half-open, 2=open).
    pub const CIRCUIT_STATE: &str = "session_store_circuit_state";
    /// Calls rejected by an open circuit (`operation` label).
    pub const CIRCUIT_REJECTIONS: &str = "session_store_circuit_rejections_total";
}

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    running: bool,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            running: false,
        }
    }

    /// Register metric descriptions, install the global recorder and start
    /// the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime; the listener is spawned
    /// onto it.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install() {
            Ok(()) => {
                register_metrics();
                self.running = true;
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Whether this server installed the exporter.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Address the exporter listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(names::SESSIONS_REGISTERED, "Sessions registered in the local index");
    describe_counter!(names::SESSIONS_EVICTED, "Sessions evicted by the concurrent-login policy");
    describe_counter!(names::LOGINS_REJECTED, "Logins rejected for exceeding the session limit");
    describe_counter!(
        names::ENFORCEMENT_SKIPPED,
        "Logins allowed without session-limit enforcement because the store was unreachable"
    );
    describe_counter!(names::SESSIONS_EXPIRED, "Sessions that expired, by cause");
    describe_counter!(names::RECONCILIATIONS, "Cold-cache reconciliations, by source");
    describe_counter!(
        names::RECONCILIATIONS_PARTIAL,
        "Reconciliations that returned partial results after their deadline"
    );
    describe_counter!(
        names::RECONCILIATION_SKIPPED_ENTRIES,
        "Store entries skipped during reconciliation because they could not be decoded"
    );
    describe_histogram!(names::RECONCILIATION_DURATION, "Time taken to reconcile one principal");
    describe_counter!(names::STORE_FAILURES, "Failed or timed-out store calls, by operation");
    describe_counter!(names::AUDIT_PUBLISH_FAILURES, "Audit events that could not be published");
    describe_gauge!(names::LOCAL_INDEX_SIZE, "Entries held in the local session index");
    describe_gauge!(
        names::CIRCUIT_STATE,
        "Store circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(names::CIRCUIT_REJECTIONS, "Store calls rejected by an open circuit");
}
