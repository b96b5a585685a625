//! Shared session store trait.

use crate::error::Result;
use crate::state::{PrincipalKey, SessionId, SessionRecord};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// What the store reported about a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// The record's TTL ran out.
    Expired,
    /// The record was deleted (logout or eviction, possibly by another process).
    Deleted,
}

/// A store-side change to one session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNotification {
    /// Session whose record changed.
    pub session_id: SessionId,
    /// What happened to it.
    pub kind: NotificationKind,
}

/// Stream of store notifications. Ends when the subscription is lost.
pub type NotificationStream = Pin<Box<dyn Stream<Item = StoreNotification> + Send>>;

/// One page of a keyspace scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page; `0` when the scan is complete.
    pub cursor: u64,
    /// Session ids found on this page (may contain duplicates across pages).
    pub session_ids: Vec<SessionId>,
}

/// Shared, TTL-capable session store.
///
/// This trait abstracts over the store every process talks to (Redis).
///
/// # Implementation Notes
///
/// - Session records expire after the inactivity timeout; access slides it
/// - Each principal has an id set that may reference records which already
///   expired; readers tolerate that and prune it
/// - Records are returned as raw bytes so a single undecodable entry never
///   fails a whole read
/// - Calls should be fast (single round trip where possible); the registry
///   wraps every call in a short timeout
pub trait SessionStore: Send + Sync + 'static {
    /// Write `record` with `ttl` and add it to its principal's id set.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or encoding fails.
    fn save_session(
        &self,
        record: &SessionRecord,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Raw bytes of a session record, `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn load_session(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Reset a record's TTL.
    ///
    /// # Returns
    ///
    /// `false` if the record no longer exists.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn touch_session(
        &self,
        session_id: &SessionId,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete a record and its principal index membership. Deleting a
    /// missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn delete_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Scan record keys, one page at a time. Start with cursor `0`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn scan_sessions(&self, cursor: u64) -> impl Future<Output = Result<ScanPage>> + Send;

    /// Add `session_id` to `principal`'s id set and extend the set's TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn index_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove `session_id` from `principal`'s id set.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn unindex_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Members of `principal`'s id set. Empty when the set does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn indexed_sessions(
        &self,
        principal: &PrincipalKey,
    ) -> impl Future<Output = Result<Vec<SessionId>>> + Send;

    /// Subscribe to expiry and deletion notifications for session records.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be established.
    fn subscribe_notifications(&self) -> impl Future<Output = Result<NotificationStream>> + Send;
}
