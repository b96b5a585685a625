//! In-memory session store for testing.

use crate::error::{Result, SessionError};
use crate::providers::{NotificationKind, NotificationStream, ScanPage, SessionStore, StoreNotification};
use crate::state::{PrincipalKey, SessionId, SessionRecord};
use async_stream::stream;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Records per scan page; small so scans always page.
const SCAN_PAGE_SIZE: usize = 2;

#[derive(Debug, Default)]
struct Inner {
    // BTreeMap keeps scan order stable across pages.
    records: BTreeMap<SessionId, Vec<u8>>,
    ttls: HashMap<SessionId, Duration>,
    index: HashMap<PrincipalKey, HashSet<SessionId>>,
    load_delays: HashMap<SessionId, Duration>,
}

/// Mock session store.
///
/// Holds raw record bytes like the real store, so undecodable entries can be
/// planted. Clones share state. Besides the [`SessionStore`] contract it can
/// simulate an outage, add latency, expire or delete records "from another
/// process" (emitting the matching notification) and count scans.
#[derive(Debug, Clone)]
pub struct MockSessionStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    scans: Arc<AtomicUsize>,
    index_reads: Arc<AtomicUsize>,
    notifications: broadcast::Sender<StoreNotification>,
}

impl MockSessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            scans: Arc::new(AtomicUsize::new(0)),
            index_reads: Arc::new(AtomicUsize::new(0)),
            notifications,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SessionError::StoreUnavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    /// Make every call fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Delay loads of one session's record by `delay`, on top of any global
    /// latency.
    pub fn set_load_latency(&self, session_id: &SessionId, delay: Duration) {
        self.lock().load_delays.insert(session_id.clone(), delay);
    }

    /// Store raw bytes under a session id, bypassing encoding.
    pub fn insert_raw(&self, session_id: &SessionId, bytes: Vec<u8>) {
        self.lock().records.insert(session_id.clone(), bytes);
    }

    /// Store a record without touching the principal index.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Serialization` if encoding fails.
    pub fn insert_unindexed(&self, record: &SessionRecord) -> Result<()> {
        self.insert_raw(&record.session_id, record.to_bytes()?);
        Ok(())
    }

    /// Whether a record exists.
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.lock().records.contains_key(session_id)
    }

    /// Number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// TTL last set on a record.
    #[must_use]
    pub fn ttl_of(&self, session_id: &SessionId) -> Option<Duration> {
        self.lock().ttls.get(session_id).copied()
    }

    /// Members of a principal's id set, sorted.
    #[must_use]
    pub fn indexed(&self, principal: &PrincipalKey) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .lock()
            .index
            .get(principal)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Drop a principal's id set, leaving its records in place.
    pub fn drop_index(&self, principal: &PrincipalKey) {
        self.lock().index.remove(principal);
    }

    /// Number of scans started (cursor `0` calls).
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Number of principal index reads.
    #[must_use]
    pub fn index_read_count(&self) -> usize {
        self.index_reads.load(Ordering::SeqCst)
    }

    /// Let a record's TTL run out: remove it and notify `Expired`.
    pub fn expire(&self, session_id: &SessionId) {
        if self.lock().records.remove(session_id).is_some() {
            self.notify(session_id, NotificationKind::Expired);
        }
    }

    /// Delete a record as another process would: remove it and notify `Deleted`.
    pub fn delete_externally(&self, session_id: &SessionId) {
        if self.lock().records.remove(session_id).is_some() {
            self.notify(session_id, NotificationKind::Deleted);
        }
    }

    /// Remove a record without any notification, as when the keyevent is lost.
    pub fn drop_record(&self, session_id: &SessionId) {
        self.lock().records.remove(session_id);
    }

    fn notify(&self, session_id: &SessionId, kind: NotificationKind) {
        // No subscribers is fine.
        let _ = self.notifications.send(StoreNotification {
            session_id: session_id.clone(),
            kind,
        });
    }
}

impl Default for MockSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MockSessionStore {
    fn save_session(&self, record: &SessionRecord, ttl: Duration) -> impl Future<Output = Result<()>> + Send {
        let store = self.clone();
        let record = record.clone();

        async move {
            store.enter().await?;
            let bytes = record.to_bytes()?;
            let mut inner = store.lock();
            inner.records.insert(record.session_id.clone(), bytes);
            inner.ttls.insert(record.session_id.clone(), ttl);
            inner
                .index
                .entry(record.principal.key())
                .or_default()
                .insert(record.session_id);
            Ok(())
        }
    }

    fn load_session(&self, session_id: &SessionId) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let store = self.clone();
        let session_id = session_id.clone();

        async move {
            store.enter().await?;
            let delay = store.lock().load_delays.get(&session_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(store.lock().records.get(&session_id).cloned())
        }
    }

    fn touch_session(&self, session_id: &SessionId, ttl: Duration) -> impl Future<Output = Result<bool>> + Send {
        let store = self.clone();
        let session_id = session_id.clone();

        async move {
            store.enter().await?;
            let mut inner = store.lock();
            if !inner.records.contains_key(&session_id) {
                return Ok(false);
            }
            inner.ttls.insert(session_id, ttl);
            Ok(true)
        }
    }

    fn delete_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send {
        let store = self.clone();
        let principal = principal.clone();
        let session_id = session_id.clone();

        async move {
            store.enter().await?;
            let existed = {
                let mut inner = store.lock();
                if let Some(set) = inner.index.get_mut(&principal) {
                    set.remove(&session_id);
                    if set.is_empty() {
                        inner.index.remove(&principal);
                    }
                }
                inner.ttls.remove(&session_id);
                inner.records.remove(&session_id).is_some()
            };
            if existed {
                store.notify(&session_id, NotificationKind::Deleted);
            }
            Ok(())
        }
    }

    fn scan_sessions(&self, cursor: u64) -> impl Future<Output = Result<ScanPage>> + Send {
        let store = self.clone();

        async move {
            store.enter().await?;
            if cursor == 0 {
                store.scans.fetch_add(1, Ordering::SeqCst);
            }
            let start = usize::try_from(cursor).unwrap_or(usize::MAX);
            let inner = store.lock();
            let session_ids: Vec<SessionId> = inner
                .records
                .keys()
                .skip(start)
                .take(SCAN_PAGE_SIZE)
                .cloned()
                .collect();
            let next = start + session_ids.len();
            let cursor = if next >= inner.records.len() {
                0
            } else {
                u64::try_from(next).unwrap_or(0)
            };
            Ok(ScanPage { cursor, session_ids })
        }
    }

    fn index_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
        _ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        let store = self.clone();
        let principal = principal.clone();
        let session_id = session_id.clone();

        async move {
            store.enter().await?;
            store
                .lock()
                .index
                .entry(principal)
                .or_default()
                .insert(session_id);
            Ok(())
        }
    }

    fn unindex_session(
        &self,
        principal: &PrincipalKey,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send {
        let store = self.clone();
        let principal = principal.clone();
        let session_id = session_id.clone();

        async move {
            store.enter().await?;
            let mut inner = store.lock();
            if let Some(set) = inner.index.get_mut(&principal) {
                set.remove(&session_id);
                if set.is_empty() {
                    inner.index.remove(&principal);
                }
            }
            Ok(())
        }
    }

    fn indexed_sessions(&self, principal: &PrincipalKey) -> impl Future<Output = Result<Vec<SessionId>>> + Send {
        let store = self.clone();
        let principal = principal.clone();

        async move {
            store.enter().await?;
            store.index_reads.fetch_add(1, Ordering::SeqCst);
            Ok(store.indexed(&principal))
        }
    }

    fn subscribe_notifications(&self) -> impl Future<Output = Result<NotificationStream>> + Send {
        let store = self.clone();

        async move {
            store.enter().await?;
            let mut receiver = store.notifications.subscribe();
            let notifications: NotificationStream = Box::pin(stream! {
                loop {
                    match receiver.recv().await {
                        Ok(notification) => yield notification,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(notifications)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::Principal;
    use chrono::Utc;
    use futures::StreamExt;

    fn record(id: &str, user: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: SessionId::from(id),
            principal: Principal::new(user, "u"),
            created_at: now,
            last_access_at: now,
        }
    }

    #[tokio::test]
    async fn test_scan_pages_through_every_record() {
        let store = MockSessionStore::new();
        for n in 0..5 {
            store.save_session(&record(&format!("s{n}"), 1), Duration::from_secs(60)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let page = store.scan_sessions(cursor).await.unwrap();
            seen.extend(page.session_ids);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(store.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let store = MockSessionStore::new();
        store.set_unavailable(true);

        let result = store.load_session(&SessionId::from("s1")).await;

        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_delete_notifies_subscribers() {
        let store = MockSessionStore::new();
        let mut notifications = store.subscribe_notifications().await.unwrap();
        store.save_session(&record("s1", 1), Duration::from_secs(60)).await.unwrap();

        store
            .delete_session(&PrincipalKey::from("1"), &SessionId::from("s1"))
            .await
            .unwrap();

        let notification = notifications.next().await.unwrap();
        assert_eq!(notification.kind, NotificationKind::Deleted);
        assert!(store.indexed(&PrincipalKey::from("1")).is_empty());
    }

    #[tokio::test]
    async fn test_touch_reports_missing_record() {
        let store = MockSessionStore::new();
        store.save_session(&record("s1", 1), Duration::from_secs(60)).await.unwrap();
        store.expire(&SessionId::from("s1"));

        let touched = store.touch_session(&SessionId::from("s1"), Duration::from_secs(60)).await.unwrap();

        assert!(!touched);
    }
}
