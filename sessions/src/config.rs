//! Session registry configuration.
//!
//! Values come from the application (builders) or from environment variables
//! (`from_env`). An invalid session limit is a startup error, never a
//! silent default.

use crate::constants::{DEFAULT_AUDIT_TOPIC, DEFAULT_NAMESPACE};
use crate::error::{Result, SessionError};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Concurrent-session control and registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRegistryConfig {
    /// Prefix of every shared-store key.
    ///
    /// Default: `district`
    pub namespace: String,

    /// Maximum concurrent sessions per principal. Must be at least 1.
    ///
    /// Default: 1
    pub max_sessions_per_principal: usize,

    /// Reject the new login instead of evicting the oldest session.
    ///
    /// Default: `false`
    pub block_new_login_if_exceeded: bool,

    /// Store TTL of a session record, slid on every request.
    ///
    /// Default: 30 minutes
    pub inactivity_timeout: Duration,

    /// Rebuild the local view from the store on a cold cache.
    ///
    /// Default: `true`
    pub reconciliation_enabled: bool,

    /// Upper bound for a single store call.
    ///
    /// Default: 250 ms
    pub store_timeout: Duration,

    /// Upper bound for one cold-cache reconciliation.
    ///
    /// Default: 2 s
    pub reconciliation_timeout: Duration,

    /// Topic for eviction audit events.
    ///
    /// Default: `session-audit-events`
    pub audit_topic: String,

    /// Also publish informational `session-expired` events.
    ///
    /// Default: `false`
    pub publish_expiry_events: bool,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_sessions_per_principal: 1,
            block_new_login_if_exceeded: false,
            inactivity_timeout: Duration::from_secs(30 * 60),
            reconciliation_enabled: true,
            store_timeout: Duration::from_millis(250),
            reconciliation_timeout: Duration::from_secs(2),
            audit_topic: DEFAULT_AUDIT_TOPIC.to_string(),
            publish_expiry_events: false,
        }
    }
}

impl SessionRegistryConfig {
    /// Create a configuration with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the session limit.
    #[must_use]
    pub const fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions_per_principal = max;
        self
    }

    /// Reject (`true`) or evict (`false`) when the limit is reached.
    #[must_use]
    pub const fn with_block_new_login(mut self, block: bool) -> Self {
        self.block_new_login_if_exceeded = block;
        self
    }

    /// Set the inactivity timeout.
    #[must_use]
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Enable or disable cold-cache reconciliation.
    #[must_use]
    pub const fn with_reconciliation(mut self, enabled: bool) -> Self {
        self.reconciliation_enabled = enabled;
        self
    }

    /// Set the per-call store timeout.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the reconciliation deadline.
    #[must_use]
    pub const fn with_reconciliation_timeout(mut self, timeout: Duration) -> Self {
        self.reconciliation_timeout = timeout;
        self
    }

    /// Set the audit topic.
    #[must_use]
    pub fn with_audit_topic(mut self, topic: impl Into<String>) -> Self {
        self.audit_topic = topic.into();
        self
    }

    /// Publish informational expiry events.
    #[must_use]
    pub const fn with_expiry_events(mut self, publish: bool) -> Self {
        self.publish_expiry_events = publish;
        self
    }

    /// Inactivity timeout in whole seconds, at least 1.
    #[must_use]
    pub fn inactivity_timeout_secs(&self) -> u64 {
        self.inactivity_timeout.as_secs().max(1)
    }

    /// Inactivity timeout as a chrono duration, for clock arithmetic.
    #[must_use]
    pub fn inactivity_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inactivity_timeout).unwrap_or(chrono::Duration::MAX)
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfiguration`] when the session limit
    /// is zero, the namespace is empty, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions_per_principal == 0 {
            return Err(SessionError::InvalidConfiguration(
                "max_sessions_per_principal must be at least 1".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.inactivity_timeout.is_zero()
            || self.store_timeout.is_zero()
            || self.reconciliation_timeout.is_zero()
        {
            return Err(SessionError::InvalidConfiguration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from environment variables, falling back to the defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SESSION_NAMESPACE` | `namespace` |
    /// | `SESSION_MAX_PER_PRINCIPAL` | `max_sessions_per_principal` |
    /// | `SESSION_BLOCK_NEW_LOGIN` | `block_new_login_if_exceeded` |
    /// | `SESSION_INACTIVITY_TIMEOUT_SECS` | `inactivity_timeout` |
    /// | `SESSION_RECONCILIATION_ENABLED` | `reconciliation_enabled` |
    /// | `SESSION_STORE_TIMEOUT_MS` | `store_timeout` |
    /// | `SESSION_RECONCILIATION_TIMEOUT_MS` | `reconciliation_timeout` |
    /// | `SESSION_AUDIT_TOPIC` | `audit_topic` |
    /// | `SESSION_PUBLISH_EXPIRY_EVENTS` | `publish_expiry_events` |
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfiguration`] when a variable is set
    /// but does not parse, or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            namespace: lookup("SESSION_NAMESPACE").unwrap_or(defaults.namespace),
            max_sessions_per_principal: parse_var(&lookup, "SESSION_MAX_PER_PRINCIPAL")?
                .unwrap_or(defaults.max_sessions_per_principal),
            block_new_login_if_exceeded: parse_var(&lookup, "SESSION_BLOCK_NEW_LOGIN")?
                .unwrap_or(defaults.block_new_login_if_exceeded),
            inactivity_timeout: parse_var(&lookup, "SESSION_INACTIVITY_TIMEOUT_SECS")?
                .map_or(defaults.inactivity_timeout, Duration::from_secs),
            reconciliation_enabled: parse_var(&lookup, "SESSION_RECONCILIATION_ENABLED")?
                .unwrap_or(defaults.reconciliation_enabled),
            store_timeout: parse_var(&lookup, "SESSION_STORE_TIMEOUT_MS")?
                .map_or(defaults.store_timeout, Duration::from_millis),
            reconciliation_timeout: parse_var(&lookup, "SESSION_RECONCILIATION_TIMEOUT_MS")?
                .map_or(defaults.reconciliation_timeout, Duration::from_millis),
            audit_topic: lookup("SESSION_AUDIT_TOPIC").unwrap_or(defaults.audit_topic),
            publish_expiry_events: parse_var(&lookup, "SESSION_PUBLISH_EXPIRY_EVENTS")?
                .unwrap_or(defaults.publish_expiry_events),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Settings of the `session-node` process.
#[derive(Debug, Clone)]
pub struct SessionNodeConfig {
    /// Redis connection URL.
    pub redis_url: String,

    /// Prometheus exporter address.
    pub metrics_addr: SocketAddr,

    /// Interval of the terminal-session sweep.
    pub sweep_interval: Duration,

    /// Issue `CONFIG SET notify-keyspace-events` at startup.
    pub configure_keyspace_events: bool,

    /// Registry settings.
    pub registry: SessionRegistryConfig,
}

impl SessionNodeConfig {
    /// Load from environment variables.
    ///
    /// Reads `REDIS_URL`, `METRICS_ADDR`, `SESSION_SWEEP_INTERVAL_SECS` and
    /// `REDIS_CONFIGURE_KEYSPACE_EVENTS` plus everything
    /// [`SessionRegistryConfig::from_env`] reads.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfiguration`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            metrics_addr: parse_var(&lookup, "METRICS_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9090))),
            sweep_interval: parse_var(&lookup, "SESSION_SWEEP_INTERVAL_SECS")?
                .map_or(Duration::from_secs(60), Duration::from_secs),
            configure_keyspace_events: parse_var(&lookup, "REDIS_CONFIGURE_KEYSPACE_EVENTS")?
                .unwrap_or(true),
            registry: SessionRegistryConfig::from_lookup(&lookup)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            SessionError::InvalidConfiguration(format!("{key} has invalid value '{raw}'"))
        }),
    }
}
