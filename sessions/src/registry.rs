//! Session registry: the local index backed by the shared store.
//!
//! The registry answers from local memory whenever it can. The store is
//! written best-effort on every change and read only to rebuild a principal
//! this process has never seen (see [`reconcile`](crate::reconcile)).
//!
//! # Example
//!
//! ```
//! use district_sessions::{MockSessionStore, Principal, SessionId, SessionRegistry, SessionRegistryConfig};
//! use district_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = SessionRegistry::new(
//!     MockSessionStore::new(),
//!     SessionRegistryConfig::default(),
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//!
//! let principal = Principal::new(1, "u1");
//! registry.register_new_session(SessionId::from("s1"), principal.clone()).await;
//!
//! let sessions = registry.get_all_sessions(&principal, false).await;
//! assert_eq!(sessions.len(), 1);
//! # });
//! ```

use crate::config::SessionRegistryConfig;
use crate::error::Result;
use crate::guard::GuardedStore;
use crate::index::LocalSessionIndex;
use crate::providers::{NotificationStream, SessionStore};
use crate::reconcile::{ReconciliationSource, Reconciler};
use crate::state::{Principal, PrincipalKey, SessionId, SessionInformation, SessionRecord, SessionStatus};
use district_core::environment::Clock;
use dashmap::DashSet;
use district_runtime::metrics::{counter, gauge, names};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where a [`SessionLookup`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Local index hit.
    Local,
    /// Reconciled through the store's principal index.
    Index,
    /// Reconciled through a full scan.
    Scan,
    /// Cold cache with reconciliation disabled.
    Disabled,
}

impl From<ReconciliationSource> for LookupSource {
    fn from(source: ReconciliationSource) -> Self {
        match source {
            ReconciliationSource::Index => Self::Index,
            ReconciliationSource::Scan => Self::Scan,
        }
    }
}

/// All sessions of one principal, as known after a lookup.
#[derive(Debug, Clone)]
pub struct SessionLookup {
    /// Sessions oldest first, terminal ones included.
    pub sessions: Vec<SessionInformation>,
    /// How they were found.
    pub source: LookupSource,
    /// Reconciliation hit its deadline.
    pub partial: bool,
}

impl SessionLookup {
    /// Sessions that are still active.
    #[must_use]
    pub fn active(&self) -> Vec<SessionInformation> {
        self.sessions.iter().filter(|s| !s.is_expired()).cloned().collect()
    }
}

/// Process-wide session registry.
///
/// Constructed once at startup and shared by cloning (all state is behind
/// `Arc`).
pub struct SessionRegistry<S> {
    index: Arc<LocalSessionIndex>,
    store: GuardedStore<S>,
    reconciler: Reconciler<S>,
    config: Arc<SessionRegistryConfig>,
    clock: Arc<dyn Clock>,
    sequence: Arc<AtomicU64>,
    // Active sessions whose store record was never written.
    unmirrored: Arc<DashSet<SessionId>>,
}

impl<S> Clone for SessionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            store: self.store.clone(),
            reconciler: self.reconciler.clone(),
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            sequence: Arc::clone(&self.sequence),
            unmirrored: Arc::clone(&self.unmirrored),
        }
    }
}

impl<S: SessionStore> SessionRegistry<S> {
    /// Create a registry over `store`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidConfiguration` if `config` does not
    /// validate.
    pub fn new(store: S, config: SessionRegistryConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let store = GuardedStore::new(Arc::new(store), config.store_timeout);

        Ok(Self {
            index: Arc::new(LocalSessionIndex::new()),
            reconciler: Reconciler::new(store.clone(), Arc::clone(&config)),
            store,
            config,
            clock,
            sequence: Arc::new(AtomicU64::new(0)),
            unmirrored: Arc::new(DashSet::new()),
        })
    }

    /// Registry configuration.
    #[must_use]
    pub fn config(&self) -> &SessionRegistryConfig {
        &self.config
    }

    /// Current time per the injected clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Number of local entries.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.index.len()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn report_index_size(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(names::LOCAL_INDEX_SIZE).set(self.index.len() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Registration and removal
    // ═══════════════════════════════════════════════════════════════════

    /// Register a freshly authenticated session.
    ///
    /// The local entry is always written. The store record and principal
    /// index are written best-effort; a store failure is logged, not
    /// returned, and the session is re-mirrored on its next request.
    ///
    /// An id that already ended in this process stays ended: its terminal
    /// entry is returned unchanged and nothing is written.
    pub async fn register_new_session(
        &self,
        session_id: SessionId,
        principal: Principal,
    ) -> SessionInformation {
        let now = self.clock.now();
        let info = SessionInformation {
            session_id,
            principal,
            created_at: now,
            last_request_at: now,
            status: SessionStatus::Active,
            sequence: self.next_sequence(),
        };

        if let Err(ended) = self.index.insert(info.clone()) {
            tracing::warn!(
                session_id = %ended.session_id,
                status = ended.status.as_str(),
                "Refusing to register a session id that already ended"
            );
            return ended;
        }
        counter!(names::SESSIONS_REGISTERED).increment(1);
        self.report_index_size();

        tracing::info!(
            session_id = %info.session_id,
            principal = %info.principal.key(),
            "Registered new session"
        );

        if !self.save_record(&info).await {
            self.unmirrored.insert(info.session_id.clone());
        }

        info
    }

    async fn save_record(&self, info: &SessionInformation) -> bool {
        let record = info.to_record();
        let ttl = self.config.inactivity_timeout;
        match self
            .store
            .call("save_session", move |s| async move {
                s.save_session(&record, ttl).await
            })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    session_id = %info.session_id,
                    error = %e,
                    "Failed to mirror session to store, continuing with local entry"
                );
                false
            }
        }
    }

    /// Write the store record of an active session that was registered while
    /// the store was unreachable.
    ///
    /// Returns `false` when the session was mirrored already (a missing
    /// record then means it ended elsewhere) or is not active.
    pub async fn remirror(&self, session_id: &SessionId) -> bool {
        if self.unmirrored.remove(session_id).is_none() {
            return false;
        }
        let Some(info) = self.index.get(session_id).filter(|i| !i.is_expired()) else {
            return false;
        };
        if self.save_record(&info).await {
            tracing::info!(session_id = %session_id, "Mirrored session registered during store outage");
        } else {
            self.unmirrored.insert(session_id.clone());
        }
        true
    }

    /// Forget a session locally and drop it from the store's principal index.
    ///
    /// Unknown ids are a no-op.
    pub async fn remove_session_information(&self, session_id: &SessionId) -> Option<SessionInformation> {
        let removed = self.index.remove(session_id)?;
        self.unmirrored.remove(session_id);
        self.report_index_size();

        tracing::debug!(session_id = %session_id, "Removed session from local index");

        let (principal, id) = (removed.principal.key(), session_id.clone());
        if let Err(e) = self
            .store
            .call("unindex_session", move |s| async move {
                s.unindex_session(&principal, &id).await
            })
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to unindex session in store");
        }

        Some(removed)
    }

    /// Delete a session record and its index membership from the store.
    ///
    /// Returns `false` when the store could not be reached.
    pub async fn delete_stored_session(&self, principal: &PrincipalKey, session_id: &SessionId) -> bool {
        let (key, id) = (principal.clone(), session_id.clone());
        match self
            .store
            .call("delete_session", move |s| async move {
                s.delete_session(&key, &id).await
            })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to delete session from store");
                false
            }
        }
    }

    /// Read and decode a record straight from the store.
    ///
    /// # Errors
    ///
    /// Returns a store failure, or `SessionError::Serialization` when the
    /// record does not decode.
    pub async fn load_stored_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        let id = session_id.clone();
        let bytes = self
            .store
            .call("load_session", move |s| async move { s.load_session(&id).await })
            .await?;
        Ok(bytes.map(|b| SessionRecord::from_bytes(&b)).transpose()?)
    }

    /// Slide the store TTL of a session. `Ok(false)` if the record is gone.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub async fn touch_stored_session(&self, session_id: &SessionId) -> Result<bool> {
        let id = session_id.clone();
        let ttl = self.config.inactivity_timeout;
        self.store
            .call("touch_session", move |s| async move {
                s.touch_session(&id, ttl).await
            })
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════

    /// Local entry for a session. Never touches the store.
    #[must_use]
    pub fn get_session_information(&self, session_id: &SessionId) -> Option<SessionInformation> {
        self.index.get(session_id)
    }

    /// All sessions of `principal`, oldest first.
    ///
    /// Reconciles on a cold cache. If the store cannot be reached the locally
    /// known sessions are returned (possibly none).
    pub async fn get_all_sessions(
        &self,
        principal: &Principal,
        include_expired: bool,
    ) -> Vec<SessionInformation> {
        let sessions = match self.lookup_sessions(principal).await {
            Ok(lookup) => lookup.sessions,
            Err(e) => {
                tracing::warn!(
                    principal = %principal.key(),
                    error = %e,
                    "Session store unavailable, answering from local index"
                );
                self.index.sessions_for(&principal.key()).unwrap_or_default()
            }
        };

        if include_expired {
            sessions
        } else {
            sessions.into_iter().filter(|s| !s.is_expired()).collect()
        }
    }

    /// Like [`get_all_sessions`](Self::get_all_sessions) but reports store
    /// failures instead of hiding them.
    ///
    /// # Errors
    ///
    /// Returns a store failure when the cache is cold and the store could not
    /// be read.
    pub async fn lookup_sessions(&self, principal: &Principal) -> Result<SessionLookup> {
        let key = principal.key();

        if let Some(sessions) = self.index.sessions_for(&key) {
            tracing::debug!(principal = %key, count = sessions.len(), "Local index hit");
            return Ok(SessionLookup {
                sessions,
                source: LookupSource::Local,
                partial: false,
            });
        }

        if !self.config.reconciliation_enabled {
            return Ok(SessionLookup {
                sessions: Vec::new(),
                source: LookupSource::Disabled,
                partial: false,
            });
        }

        let reconciliation = self.reconciler.reconcile(principal).await?;
        for record in reconciliation.records {
            let info = SessionInformation::from_record(record, self.next_sequence());
            self.index.insert_if_absent(info);
        }
        self.report_index_size();

        Ok(SessionLookup {
            sessions: self.index.sessions_for(&key).unwrap_or_default(),
            source: reconciliation.source.into(),
            partial: reconciliation.partial,
        })
    }

    /// Every principal known locally or present in the store.
    ///
    /// Diagnostic: scans the whole store. Store failures fall back to the
    /// local principals.
    pub async fn get_all_principals(&self) -> Vec<Principal> {
        let mut principals: HashMap<PrincipalKey, Principal> = self
            .index
            .principals()
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();

        let scanned = self
            .reconciler
            .scan_all(|record| {
                principals
                    .entry(record.principal.key())
                    .or_insert(record.principal);
            })
            .await;
        match scanned {
            Ok(scan) if scan.partial => tracing::warn!("Principal scan incomplete, result is partial"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Store scan failed, listing local principals only"),
        }

        let mut principals: Vec<Principal> = principals.into_values().collect();
        principals.sort_by_key(|p| p.user_id);
        principals
    }

    // ═══════════════════════════════════════════════════════════════════
    // Local state changes
    // ═══════════════════════════════════════════════════════════════════

    /// Record a request on an active session. No-op (`false`) if unknown.
    pub fn refresh_last_request(&self, session_id: &SessionId) -> bool {
        self.index.touch(session_id, self.clock.now())
    }

    /// Move an active session to a terminal status.
    ///
    /// Returns the entry as it was before, or `None` when nothing changed.
    pub fn mark_terminal(&self, session_id: &SessionId, status: SessionStatus) -> Option<SessionInformation> {
        let before = self.index.transition(session_id, status)?;
        self.unmirrored.remove(session_id);
        Some(before)
    }

    /// Drop every local entry, as a restart would.
    pub fn clear_local_index(&self) {
        self.index.clear();
        self.unmirrored.clear();
        self.report_index_size();
        tracing::info!("Cleared local session index");
    }

    /// Drop terminal entries idle longer than the inactivity timeout.
    pub fn purge_terminal_sessions(&self) -> usize {
        let cutoff = self.clock.now() - self.config.inactivity_timeout_chrono();
        let purged = self.index.purge_terminal(cutoff);
        if purged > 0 {
            self.report_index_size();
            tracing::debug!(purged, "Purged terminal sessions from local index");
        }
        purged
    }

    /// Open the store's notification stream (not guarded by the breaker).
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be established.
    pub async fn subscribe_notifications(&self) -> Result<NotificationStream> {
        self.store.inner().subscribe_notifications().await
    }
}
