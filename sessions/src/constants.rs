//! Session subsystem constants.
//!
//! Store key segments, audit event types and the keyevent channels the
//! expiration listener subscribes to.

/// Shared-store key layout.
///
/// Keys are `<namespace>:<segment>:<id>`; see [`session_key`] and
/// [`principal_sessions_key`].
pub mod keys {
    /// Segment for session records.
    pub const SESSIONS: &str = "sessions";

    /// Segment for the per-principal session id sets.
    pub const PRINCIPAL_SESSIONS: &str = "principal-sessions";

    /// Grace added to the principal index TTL so the set outlives its sessions.
    pub const PRINCIPAL_INDEX_GRACE_SECS: u64 = 86_400;

    /// Key of one session record.
    #[must_use]
    pub fn session_key(namespace: &str, session_id: &str) -> String {
        format!("{namespace}:{SESSIONS}:{session_id}")
    }

    /// Prefix shared by all session record keys.
    #[must_use]
    pub fn session_key_prefix(namespace: &str) -> String {
        format!("{namespace}:{SESSIONS}:")
    }

    /// Key of a principal's session id set.
    #[must_use]
    pub fn principal_sessions_key(namespace: &str, principal_key: &str) -> String {
        format!("{namespace}:{PRINCIPAL_SESSIONS}:{principal_key}")
    }
}

/// Event type identifiers carried in `SerializedEvent::event_type`.
pub mod event_types {
    /// A session was forced out by the concurrent-login policy.
    pub const CONCURRENT_SESSION_EVICTED: &str = "concurrent-session-evicted";

    /// A session reached its inactivity timeout (informational).
    pub const SESSION_EXPIRED: &str = "session-expired";
}

/// Redis keyspace notification channels.
pub mod keyevents {
    /// Pattern for keys dropped by TTL, on every database.
    pub const EXPIRED_PATTERN: &str = "__keyevent@*__:expired";

    /// Pattern for keys removed by `DEL`, on every database.
    pub const DEL_PATTERN: &str = "__keyevent@*__:del";

    /// `notify-keyspace-events` flags enabling both channels.
    pub const NOTIFY_FLAGS: &str = "Egx";
}

/// Default audit topic.
pub const DEFAULT_AUDIT_TOPIC: &str = "session-audit-events";

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "district";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::session_key("district", "s1"), "district:sessions:s1");
        assert_eq!(
            keys::principal_sessions_key("district", "42"),
            "district:principal-sessions:42"
        );
        assert!(keys::session_key("ns", "abc").starts_with(&keys::session_key_prefix("ns")));
    }

    #[test]
    fn test_event_types_are_distinct() {
        assert_ne!(
            event_types::CONCURRENT_SESSION_EVICTED,
            event_types::SESSION_EXPIRED
        );
    }
}
