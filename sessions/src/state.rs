//! Session and principal types.
//!
//! All types are `Clone` and cheap to copy around handlers; the local index
//! hands out clones rather than references into its maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Opaque session identifier, as carried by the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random `SessionId` (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The single comparison key of a [`Principal`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalKey(pub String);

impl PrincipalKey {
    /// Borrow the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Principal
// ═══════════════════════════════════════════════════════════════════════

/// The authenticated identity a session belongs to.
///
/// Identity is decided by [`Principal::key`] alone: two principals built
/// independently (say, one deserialized from the shared store by another
/// process) are equal when their user ids match, whatever their display
/// attributes say.
///
/// # Examples
///
/// ```
/// # use district_sessions::Principal;
/// let here = Principal::new(7, "kim");
/// let there = Principal::new(7, "kim").with_display_name("Kim L.");
/// assert_eq!(here, there);
/// assert_eq!(here.key().as_str(), "7");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Numeric user id.
    pub user_id: i64,

    /// Login name.
    pub login_name: String,

    /// Display name, if known.
    pub display_name: Option<String>,
}

impl Principal {
    /// Create a principal without display attributes.
    #[must_use]
    pub fn new(user_id: i64, login_name: impl Into<String>) -> Self {
        Self {
            user_id,
            login_name: login_name.into(),
            display_name: None,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Comparison key used for equality, hashing and store index keys.
    #[must_use]
    pub fn key(&self) -> PrincipalKey {
        PrincipalKey(self.user_id.to_string())
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Records and local entries
// ═══════════════════════════════════════════════════════════════════════

/// Authoritative session record, as held by the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: SessionId,

    /// Owner of the session.
    pub principal: Principal,

    /// When the session was created (successful authentication).
    pub created_at: DateTime<Utc>,

    /// Last authenticated request.
    pub last_access_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Encode for the shared store.
    ///
    /// # Errors
    ///
    /// Returns `bincode::Error` if encoding fails.
    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    /// Decode a stored record.
    ///
    /// # Errors
    ///
    /// Returns `bincode::Error` if the bytes are not a valid record.
    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
}

/// Where a session is in its lifecycle.
///
/// Every state but `Active` is terminal: a session id never becomes active
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session may be used.
    Active,
    /// Forced out by the concurrent-login policy.
    Evicted,
    /// Dropped by the shared store's inactivity TTL.
    ExpiredByTtl,
    /// Explicitly ended (logout here, or deletion observed from another process).
    Removed,
}

impl SessionStatus {
    /// `true` for every state a session cannot leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Stable lowercase name, used as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Evicted => "evicted",
            Self::ExpiredByTtl => "expired_by_ttl",
            Self::Removed => "removed",
        }
    }
}

/// Local index entry for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInformation {
    /// Session identifier.
    pub session_id: SessionId,

    /// Owner of the session.
    pub principal: Principal,

    /// Creation time, used to find the oldest session.
    pub created_at: DateTime<Utc>,

    /// Last request seen by this process.
    pub last_request_at: DateTime<Utc>,

    /// Lifecycle state as known locally.
    pub status: SessionStatus,

    /// Registration order within this process; breaks `created_at` ties.
    pub sequence: u64,
}

impl SessionInformation {
    /// `true` when the session must be treated as unauthenticated.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.status.is_terminal()
    }

    /// Ordering key for "oldest first".
    #[must_use]
    pub const fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }

    /// Build an active entry from a store record.
    #[must_use]
    pub fn from_record(record: SessionRecord, sequence: u64) -> Self {
        Self {
            session_id: record.session_id,
            principal: record.principal,
            created_at: record.created_at,
            last_request_at: record.last_access_at,
            status: SessionStatus::Active,
            sequence,
        }
    }

    /// The store record mirroring this entry.
    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            principal: self.principal.clone(),
            created_at: self.created_at,
            last_access_at: self.last_request_at,
        }
    }
}
