//! Session lifecycle events published to the audit channel.
//!
//! Only eviction is an audit fact. Expiry events are informational and are
//! published only when `publish_expiry_events` is on.

use crate::constants::event_types;
use crate::state::{Principal, PrincipalKey, SessionId};
use chrono::{DateTime, Utc};
use district_core::event::{Event, EventError, SerializedEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Session lifecycle events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycleEvent {
    /// A session was forced out because its principal logged in again.
    ConcurrentSessionEvicted {
        /// Owner of the evicted session
        principal: PrincipalKey,
        /// Login name of the owner, for human readers
        login_name: String,
        /// The session that was evicted
        evicted_session_id: SessionId,
        /// When the eviction happened
        timestamp: DateTime<Utc>,
    },

    /// A session reached the store's inactivity timeout.
    SessionExpired {
        /// Owner of the session
        principal: PrincipalKey,
        /// The expired session
        session_id: SessionId,
        /// When expiry was observed
        timestamp: DateTime<Utc>,
    },
}

impl SessionLifecycleEvent {
    /// Eviction event for `session_id` owned by `principal`.
    #[must_use]
    pub fn evicted(principal: &Principal, session_id: SessionId, timestamp: DateTime<Utc>) -> Self {
        Self::ConcurrentSessionEvicted {
            principal: principal.key(),
            login_name: principal.login_name.clone(),
            evicted_session_id: session_id,
            timestamp,
        }
    }

    /// Expiry event for `session_id` owned by `principal`.
    #[must_use]
    pub fn expired(principal: &Principal, session_id: SessionId, timestamp: DateTime<Utc>) -> Self {
        Self::SessionExpired {
            principal: principal.key(),
            session_id,
            timestamp,
        }
    }

    /// Flat JSON view carried as event metadata.
    #[must_use]
    pub fn metadata(&self) -> serde_json::Value {
        match self {
            Self::ConcurrentSessionEvicted {
                principal,
                login_name,
                evicted_session_id,
                timestamp,
            } => json!({
                "type": self.event_type(),
                "principal": principal.as_str(),
                "loginName": login_name,
                "evictedSessionId": evicted_session_id.as_str(),
                "timestamp": timestamp.to_rfc3339(),
            }),
            Self::SessionExpired {
                principal,
                session_id,
                timestamp,
            } => json!({
                "type": self.event_type(),
                "principal": principal.as_str(),
                "sessionId": session_id.as_str(),
                "timestamp": timestamp.to_rfc3339(),
            }),
        }
    }

    /// Wire form for the event bus.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EventError> {
        SerializedEvent::from_event(self, Some(self.metadata()))
    }
}

impl Event for SessionLifecycleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ConcurrentSessionEvicted { .. } => event_types::CONCURRENT_SESSION_EVICTED,
            Self::SessionExpired { .. } => event_types::SESSION_EXPIRED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_eviction_metadata_shape() {
        let timestamp = Utc::now();
        let event = SessionLifecycleEvent::evicted(
            &Principal::new(5, "u5"),
            SessionId::from("s1"),
            timestamp,
        );

        let wire = event.to_serialized().unwrap();

        assert_eq!(wire.event_type, "concurrent-session-evicted");
        let metadata = wire.metadata.unwrap();
        assert_eq!(metadata["type"], "concurrent-session-evicted");
        assert_eq!(metadata["principal"], "5");
        assert_eq!(metadata["evictedSessionId"], "s1");
        assert_eq!(metadata["timestamp"], timestamp.to_rfc3339());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_payload_decodes_to_the_same_event() {
        let event =
            SessionLifecycleEvent::expired(&Principal::new(1, "u1"), SessionId::from("s9"), Utc::now());

        let decoded: SessionLifecycleEvent = event.to_serialized().unwrap().decode().unwrap();

        assert_eq!(decoded, event);
    }
}
