//! Per-process session index.
//!
//! Two concurrent maps: session id → entry, and principal key → the ids of
//! that principal's sessions. Every id in a principal set has an entry in the
//! session map at every instant:
//!
//! - insert writes the entry before adding the id to the set
//! - remove takes the id out of the set (dropping the set when it empties)
//!   before removing the entry
//!
//! No method holds a reference into one map while touching the other.

use crate::state::{Principal, PrincipalKey, SessionId, SessionInformation, SessionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;

/// The sessions of one principal.
#[derive(Debug, Clone)]
pub struct PrincipalSessions {
    /// Principal as last registered.
    pub principal: Principal,
    /// Ids of this principal's locally known sessions.
    pub session_ids: HashSet<SessionId>,
}

/// Lock-sharded local view of sessions.
#[derive(Debug, Default)]
pub struct LocalSessionIndex {
    sessions: DashMap<SessionId, SessionInformation>,
    principals: DashMap<PrincipalKey, PrincipalSessions>,
}

impl LocalSessionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. Returns the replaced entry.
    ///
    /// A terminal entry is never replaced: the id keeps its status and the
    /// existing entry comes back as `Err`.
    pub fn insert(&self, info: SessionInformation) -> Result<Option<SessionInformation>, SessionInformation> {
        let session_id = info.session_id.clone();
        let principal = info.principal.clone();

        let previous = match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(entry) if entry.get().is_expired() => return Err(entry.get().clone()),
            Entry::Occupied(mut entry) => Some(entry.insert(info)),
            Entry::Vacant(entry) => {
                entry.insert(info);
                None
            }
        };
        if let Some(prev) = &previous {
            if prev.principal != principal {
                self.detach(&prev.principal.key(), &session_id);
            }
        }

        self.attach(principal, session_id);
        Ok(previous)
    }

    /// Insert an entry only if the id is unknown. Returns whether it was
    /// inserted.
    pub fn insert_if_absent(&self, info: SessionInformation) -> bool {
        let session_id = info.session_id.clone();
        let principal = info.principal.clone();

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(entry) => {
                entry.insert(info);
            }
        }

        self.attach(principal, session_id);
        true
    }

    fn attach(&self, principal: Principal, session_id: SessionId) {
        self.principals
            .entry(principal.key())
            .or_insert_with(|| PrincipalSessions {
                principal,
                session_ids: HashSet::new(),
            })
            .session_ids
            .insert(session_id);
    }

    /// Remove an entry. Removing an unknown id is a no-op.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionInformation> {
        let principal_key = self.sessions.get(session_id).map(|e| e.principal.key())?;
        self.detach(&principal_key, session_id);
        self.sessions.remove(session_id).map(|(_, info)| info)
    }

    fn detach(&self, principal_key: &PrincipalKey, session_id: &SessionId) {
        if let Some(mut entry) = self.principals.get_mut(principal_key) {
            entry.session_ids.remove(session_id);
        }
        self.principals
            .remove_if(principal_key, |_, sessions| sessions.session_ids.is_empty());
    }

    /// Clone of one entry.
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<SessionInformation> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    /// All entries of a principal, oldest first.
    ///
    /// `None` means the principal is unknown to this process (cold cache),
    /// which is different from a known principal without sessions.
    #[must_use]
    pub fn sessions_for(&self, principal_key: &PrincipalKey) -> Option<Vec<SessionInformation>> {
        let ids: Vec<SessionId> = self
            .principals
            .get(principal_key)
            .map(|e| e.session_ids.iter().cloned().collect())?;

        let mut sessions: Vec<SessionInformation> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        sessions.sort_by_key(SessionInformation::age_key);
        Some(sessions)
    }

    /// Whether any session of `principal_key` is known locally.
    #[must_use]
    pub fn knows_principal(&self, principal_key: &PrincipalKey) -> bool {
        self.principals.contains_key(principal_key)
    }

    /// All principals with at least one local entry.
    #[must_use]
    pub fn principals(&self) -> Vec<Principal> {
        self.principals
            .iter()
            .map(|e| e.value().principal.clone())
            .collect()
    }

    /// Record a request on an active session. `false` if unknown or terminal.
    pub fn touch(&self, session_id: &SessionId, at: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) if !entry.is_expired() => {
                entry.last_request_at = at;
                true
            }
            _ => false,
        }
    }

    /// Move an active session to a terminal status.
    ///
    /// Returns the entry as it was before the change, or `None` when nothing
    /// changed (unknown id, already terminal, or `to` is `Active`).
    pub fn transition(&self, session_id: &SessionId, to: SessionStatus) -> Option<SessionInformation> {
        if !to.is_terminal() {
            return None;
        }
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.is_expired() {
            return None;
        }
        let before = entry.value().clone();
        entry.status = to;
        Some(before)
    }

    /// Drop terminal entries whose last request is older than `cutoff`.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| e.is_expired() && e.last_request_at < cutoff)
            .map(|e| e.key().clone())
            .collect();

        stale.iter().filter(|id| self.remove(id).is_some()).count()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.principals.clear();
        self.sessions.clear();
    }

    /// Number of entries, terminal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of principals with at least one entry.
    #[must_use]
    pub fn principal_count(&self) -> usize {
        self.principals.len()
    }

    /// Check the set/entry invariant. Used by tests.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let sets: Vec<(PrincipalKey, Vec<SessionId>)> = self
            .principals
            .iter()
            .map(|e| (e.key().clone(), e.session_ids.iter().cloned().collect()))
            .collect();

        sets.iter().all(|(key, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    self.sessions
                        .get(id)
                        .is_some_and(|entry| &entry.principal.key() == key)
                })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn info(id: &str, user: i64, created_at: DateTime<Utc>, sequence: u64) -> SessionInformation {
        SessionInformation {
            session_id: SessionId::from(id),
            principal: Principal::new(user, format!("user{user}")),
            created_at,
            last_request_at: created_at,
            status: SessionStatus::Active,
            sequence,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();

        index.insert(info("s1", 1, now, 1)).unwrap();
        index.insert(info("s2", 1, now - Duration::seconds(5), 2)).unwrap();

        let sessions = index.sessions_for(&PrincipalKey::from("1"));
        let ids: Option<Vec<&str>> = sessions
            .as_ref()
            .map(|s| s.iter().map(|i| i.session_id.as_str()).collect());
        assert_eq!(ids, Some(vec!["s2", "s1"]));
        assert!(index.is_consistent());
    }

    #[test]
    fn test_unknown_principal_is_none_not_empty() {
        let index = LocalSessionIndex::new();
        assert!(index.sessions_for(&PrincipalKey::from("7")).is_none());
    }

    #[test]
    fn test_removing_last_session_drops_principal() {
        let index = LocalSessionIndex::new();
        index.insert(info("s1", 1, Utc::now(), 1)).unwrap();

        assert!(index.remove(&SessionId::from("s1")).is_some());
        assert!(index.remove(&SessionId::from("s1")).is_none());
        assert!(!index.knows_principal(&PrincipalKey::from("1")));
        assert!(index.is_empty());
    }

    #[test]
    fn test_equal_timestamps_order_by_sequence() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();
        index.insert(info("b", 1, now, 2)).unwrap();
        index.insert(info("a", 1, now, 1)).unwrap();

        let first = index
            .sessions_for(&PrincipalKey::from("1"))
            .and_then(|s| s.first().map(|i| i.session_id.clone()));
        assert_eq!(first, Some(SessionId::from("a")));
    }

    #[test]
    fn test_transition_only_from_active() {
        let index = LocalSessionIndex::new();
        index.insert(info("s1", 1, Utc::now(), 1)).unwrap();
        let id = SessionId::from("s1");

        assert!(index.transition(&id, SessionStatus::Active).is_none());
        assert!(index.transition(&id, SessionStatus::Evicted).is_some());
        assert!(index.transition(&id, SessionStatus::ExpiredByTtl).is_none());
        assert_eq!(index.get(&id).map(|i| i.status), Some(SessionStatus::Evicted));
    }

    #[test]
    fn test_touch_ignores_terminal_sessions() {
        let index = LocalSessionIndex::new();
        let created = Utc::now();
        index.insert(info("s1", 1, created, 1)).unwrap();
        let id = SessionId::from("s1");

        assert!(index.touch(&id, created + Duration::seconds(1)));
        index.transition(&id, SessionStatus::Removed);
        assert!(!index.touch(&id, created + Duration::seconds(2)));
        assert_eq!(
            index.get(&id).map(|i| i.last_request_at),
            Some(created + Duration::seconds(1))
        );
    }

    #[test]
    fn test_purge_terminal_keeps_active_and_recent() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();
        let old = now - Duration::hours(2);
        index.insert(info("old-evicted", 1, old, 1)).unwrap();
        index.insert(info("old-active", 1, old, 2)).unwrap();
        index.insert(info("new-evicted", 2, now, 3)).unwrap();
        index.transition(&SessionId::from("old-evicted"), SessionStatus::Evicted);
        index.transition(&SessionId::from("new-evicted"), SessionStatus::Evicted);

        let purged = index.purge_terminal(now - Duration::hours(1));

        assert_eq!(purged, 1);
        assert!(index.get(&SessionId::from("old-evicted")).is_none());
        assert!(index.get(&SessionId::from("old-active")).is_some());
        assert!(index.get(&SessionId::from("new-evicted")).is_some());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_reinsert_under_other_principal_moves_id() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();
        index.insert(info("s1", 1, now, 1)).unwrap();
        index.insert(info("s1", 2, now, 2)).unwrap();

        assert!(!index.knows_principal(&PrincipalKey::from("1")));
        assert!(index.knows_principal(&PrincipalKey::from("2")));
        assert!(index.is_consistent());
    }

    #[test]
    fn test_concurrent_insert_remove_keeps_invariant() {
        let index = Arc::new(LocalSessionIndex::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for n in 0..200u64 {
                        let id = format!("t{t}-{n}");
                        index.insert(info(&id, i64::from(t % 3), now, n)).unwrap();
                        if n % 2 == 0 {
                            index.remove(&SessionId::from(id.as_str()));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().is_ok());
        }

        assert_eq!(index.len(), 8 * 100);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_terminal_entry_is_never_replaced() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();
        index.insert(info("s1", 1, now, 1)).unwrap();
        index.transition(&SessionId::from("s1"), SessionStatus::Evicted);

        let refused = index.insert(info("s1", 1, now + Duration::seconds(5), 2));

        assert_eq!(refused.map_err(|e| e.status), Err(SessionStatus::Evicted));
        assert_eq!(index.get(&SessionId::from("s1")).map(|i| i.sequence), Some(1));
        assert!(index.is_consistent());
    }

    #[test]
    fn test_insert_if_absent_keeps_existing_entry() {
        let index = LocalSessionIndex::new();
        let now = Utc::now();
        index.insert(info("s1", 1, now, 1)).unwrap();

        assert!(!index.insert_if_absent(info("s1", 1, now, 9)));
        assert!(index.insert_if_absent(info("s2", 1, now, 2)));
        assert_eq!(index.get(&SessionId::from("s1")).map(|i| i.sequence), Some(1));
        assert_eq!(index.sessions_for(&PrincipalKey::from("1")).map(|s| s.len()), Some(2));
    }
}
