//! Error types for the session registry.

use crate::state::{PrincipalKey, SessionId, SessionStatus};
use thiserror::Error;

/// Result type alias for session registry operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Failure modes of the session subsystem.
///
/// Only [`SessionError::TooManySessions`], [`SessionError::SessionEnded`]
/// and [`SessionError::InvalidConfiguration`] ever reach callers of the
/// lifecycle façade; store failures are absorbed (fail-open) and only show up in logs
/// and metrics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════
    // Shared store
    // ═══════════════════════════════════════════════════════════

    /// The shared store rejected the call or could not be reached.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call exceeded its timeout.
    #[error("Session store call '{operation}' timed out")]
    StoreTimeout {
        /// Store operation that timed out
        operation: &'static str,
    },

    /// The store circuit is open after repeated failures.
    #[error("Session store circuit is open")]
    CircuitOpen,

    /// A stored record could not be encoded or decoded.
    #[error("Session record serialization failed: {0}")]
    Serialization(String),

    // ═══════════════════════════════════════════════════════════
    // Policy
    // ═══════════════════════════════════════════════════════════

    /// The principal already holds the maximum number of sessions and new
    /// logins are blocked rather than evicting.
    #[error("Principal {principal} already has {active} of {max} allowed sessions")]
    TooManySessions {
        /// Principal that attempted to log in
        principal: PrincipalKey,
        /// Active sessions observed
        active: usize,
        /// Configured maximum
        max: usize,
    },

    /// The session id already ended in this process and cannot be
    /// registered again.
    #[error("Session {session_id} already ended as {}", status.as_str())]
    SessionEnded {
        /// Session that was presented again
        session_id: SessionId,
        /// Terminal status it holds
        status: SessionStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Startup
    // ═══════════════════════════════════════════════════════════

    /// Configuration rejected at startup.
    #[error("Invalid session configuration: {0}")]
    InvalidConfiguration(String),
}

impl SessionError {
    /// Returns `true` if the error means the shared store could not answer.
    ///
    /// These are the fail-open cases: callers log them and carry on with
    /// local knowledge.
    ///
    /// # Examples
    ///
    /// ```
    /// # use district_sessions::SessionError;
    /// assert!(SessionError::CircuitOpen.is_store_failure());
    /// assert!(!SessionError::Serialization("bad".into()).is_store_failure());
    /// ```
    #[must_use]
    pub const fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::StoreTimeout { .. } | Self::CircuitOpen
        )
    }
}

impl From<redis::RedisError> for SessionError {
    fn from(e: redis::RedisError) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<bincode::Error> for SessionError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failures_are_classified() {
        assert!(SessionError::StoreUnavailable("down".into()).is_store_failure());
        assert!(SessionError::StoreTimeout { operation: "scan" }.is_store_failure());
        assert!(SessionError::CircuitOpen.is_store_failure());
        assert!(!SessionError::InvalidConfiguration("zero".into()).is_store_failure());
    }

    #[test]
    fn test_too_many_sessions_message() {
        let err = SessionError::TooManySessions {
            principal: PrincipalKey::from("42"),
            active: 1,
            max: 1,
        };
        assert_eq!(
            err.to_string(),
            "Principal 42 already has 1 of 1 allowed sessions"
        );
    }
}
