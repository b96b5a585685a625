//! Cold-cache reconciliation against the shared store.
//!
//! When a process has no local entry for a principal (fresh start, restart,
//! first request routed here) it rebuilds that principal's sessions from the
//! store before answering:
//!
//! 1. **Index**: read the principal's id set and load each referenced record.
//!    Ids whose record is gone are pruned from the set.
//! 2. **Scan**: if the index is missing or yields nothing live, scan every
//!    session record and keep the principal's. Found ids are written back to
//!    the index.
//!
//! The whole pass has a deadline. Past it, whatever was gathered is returned
//! and the result is flagged partial. A store call failing mid-pass ends the
//! pass the same way; only a store that cannot be read at all (index read
//! and first scan page both fail) is an error. Records that do not decode
//! are skipped with a warning; they never abort the pass.

use crate::config::SessionRegistryConfig;
use crate::error::Result;
use crate::guard::GuardedStore;
use crate::providers::SessionStore;
use crate::state::{Principal, PrincipalKey, SessionId, SessionRecord};
use district_runtime::metrics::{counter, histogram, names};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of a full-store scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    /// The deadline passed or a store call failed before the scan finished.
    pub partial: bool,
    /// Entries skipped because they did not decode.
    pub skipped: usize,
}

/// Where a reconciliation found its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationSource {
    /// The principal's id set.
    Index,
    /// A full keyspace scan.
    Scan,
}

impl ReconciliationSource {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Scan => "scan",
        }
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Live records of the principal, oldest first.
    pub records: Vec<SessionRecord>,
    /// How they were found.
    pub source: ReconciliationSource,
    /// The deadline passed, or the store failed, before the pass finished.
    pub partial: bool,
    /// Entries skipped because they did not decode.
    pub skipped: usize,
}

/// Rebuilds one principal's sessions from the store.
pub(crate) struct Reconciler<S> {
    store: GuardedStore<S>,
    config: Arc<SessionRegistryConfig>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Default)]
struct Pass {
    records: Vec<SessionRecord>,
    partial: bool,
    skipped: usize,
}

enum Loaded {
    Record(SessionRecord),
    Missing,
    Corrupt,
}

impl<S: SessionStore> Reconciler<S> {
    pub(crate) const fn new(store: GuardedStore<S>, config: Arc<SessionRegistryConfig>) -> Self {
        Self { store, config }
    }

    /// Rebuild `principal`'s live sessions.
    ///
    /// # Errors
    ///
    /// Returns a store failure if the store could not be read at all. Partial
    /// reads (deadline passed, or a later store call failed) are not errors.
    pub(crate) async fn reconcile(&self, principal: &Principal) -> Result<Reconciliation> {
        let started = Instant::now();
        let deadline = started + self.config.reconciliation_timeout;
        let key = principal.key();

        let indexed = match self.from_index(&key, deadline).await {
            Ok(pass) => Some(pass),
            Err(e) => {
                tracing::warn!(principal = %key, error = %e, "Principal index unreadable, falling back to scan");
                None
            }
        };
        let (mut pass, source) = match indexed {
            Some(pass) if !pass.records.is_empty() || pass.partial => (pass, ReconciliationSource::Index),
            indexed => {
                let mut scanned = self.from_scan(&key, deadline).await?;
                scanned.skipped += indexed.map_or(0, |p| p.skipped);
                self.repair_index(&key, &scanned.records, deadline).await;
                (scanned, ReconciliationSource::Scan)
            }
        };

        pass.records
            .sort_by(|a, b| (a.created_at, &a.session_id).cmp(&(b.created_at, &b.session_id)));

        counter!(names::RECONCILIATIONS, "source" => source.as_str()).increment(1);
        histogram!(names::RECONCILIATION_DURATION).record(started.elapsed().as_secs_f64());
        if pass.partial {
            counter!(names::RECONCILIATIONS_PARTIAL).increment(1);
            tracing::warn!(
                principal = %key,
                found = pass.records.len(),
                "Reconciliation incomplete, returning partial result"
            );
        }

        tracing::info!(
            principal = %key,
            source = source.as_str(),
            found = pass.records.len(),
            skipped = pass.skipped,
            elapsed_ms = started.elapsed().as_millis(),
            "Reconciled principal sessions from store"
        );

        Ok(Reconciliation {
            records: pass.records,
            source,
            partial: pass.partial,
            skipped: pass.skipped,
        })
    }

    /// Visit every decodable session record in the store.
    ///
    /// Bounded by the reconciliation deadline like a principal rebuild.
    ///
    /// # Errors
    ///
    /// Returns a store failure if the first scan page cannot be read.
    pub(crate) async fn scan_all<F>(&self, visit: F) -> Result<ScanOutcome>
    where
        F: FnMut(SessionRecord) + Send,
    {
        let deadline = Instant::now() + self.config.reconciliation_timeout;
        let outcome = self.scan(deadline, visit).await?;
        if outcome.partial {
            counter!(names::RECONCILIATIONS_PARTIAL).increment(1);
        }
        Ok(outcome)
    }

    async fn from_index(&self, key: &PrincipalKey, deadline: Instant) -> Result<Pass> {
        let principal = key.clone();
        let ids = self
            .store
            .call("indexed_sessions", move |s| async move {
                s.indexed_sessions(&principal).await
            })
            .await?;

        let mut pass = Pass::default();
        for id in ids {
            if Instant::now() >= deadline {
                pass.partial = true;
                break;
            }
            match self.load(&id).await {
                Ok(Loaded::Record(record)) if &record.principal.key() == key => pass.records.push(record),
                Ok(Loaded::Record(_) | Loaded::Missing) => self.prune(key, &id).await,
                Ok(Loaded::Corrupt) => pass.skipped += 1,
                Err(e) => {
                    tracing::warn!(principal = %key, session_id = %id, error = %e, "Store failed mid-reconciliation");
                    pass.partial = true;
                    break;
                }
            }
        }
        Ok(pass)
    }

    async fn from_scan(&self, key: &PrincipalKey, deadline: Instant) -> Result<Pass> {
        let mut records = Vec::new();
        let outcome = self
            .scan(deadline, |record| {
                if &record.principal.key() == key {
                    records.push(record);
                }
            })
            .await?;

        Ok(Pass {
            records,
            partial: outcome.partial,
            skipped: outcome.skipped,
        })
    }

    async fn scan<F>(&self, deadline: Instant, mut visit: F) -> Result<ScanOutcome>
    where
        F: FnMut(SessionRecord) + Send,
    {
        let mut outcome = ScanOutcome::default();
        let mut seen = HashSet::new();
        let mut cursor = 0;
        let mut first_page = true;

        'pages: loop {
            if Instant::now() >= deadline {
                outcome.partial = true;
                break;
            }
            let page = match self
                .store
                .call("scan_sessions", move |s| async move { s.scan_sessions(cursor).await })
                .await
            {
                Ok(page) => page,
                Err(e) if first_page => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Store failed mid-scan, stopping early");
                    outcome.partial = true;
                    break;
                }
            };
            first_page = false;

            for id in page.session_ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if Instant::now() >= deadline {
                    outcome.partial = true;
                    break 'pages;
                }
                match self.load(&id).await {
                    Ok(Loaded::Record(record)) => visit(record),
                    Ok(Loaded::Missing) => {}
                    Ok(Loaded::Corrupt) => outcome.skipped += 1,
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Store failed mid-scan, stopping early");
                        outcome.partial = true;
                        break 'pages;
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(outcome)
    }

    async fn load(&self, id: &SessionId) -> Result<Loaded> {
        let session_id = id.clone();
        let bytes = self
            .store
            .call("load_session", move |s| async move {
                s.load_session(&session_id).await
            })
            .await?;

        Ok(match bytes {
            None => Loaded::Missing,
            Some(bytes) => match SessionRecord::from_bytes(&bytes) {
                Ok(record) => Loaded::Record(record),
                Err(e) => {
                    counter!(names::RECONCILIATION_SKIPPED_ENTRIES).increment(1);
                    tracing::warn!(
                        session_id = %id,
                        error = %e,
                        "Skipping session record that failed to deserialize"
                    );
                    Loaded::Corrupt
                }
            },
        })
    }

    async fn prune(&self, key: &PrincipalKey, id: &SessionId) {
        let (principal, session_id) = (key.clone(), id.clone());
        if let Err(e) = self
            .store
            .call("unindex_session", move |s| async move {
                s.unindex_session(&principal, &session_id).await
            })
            .await
        {
            tracing::debug!(principal = %key, session_id = %id, error = %e, "Failed to prune stale index entry");
        }
    }

    async fn repair_index(&self, key: &PrincipalKey, records: &[SessionRecord], deadline: Instant) {
        let ttl = self.config.inactivity_timeout;
        for record in records {
            if Instant::now() >= deadline {
                return;
            }
            let (principal, session_id) = (key.clone(), record.session_id.clone());
            if let Err(e) = self
                .store
                .call("index_session", move |s| async move {
                    s.index_session(&principal, &session_id, ttl).await
                })
                .await
            {
                tracing::warn!(principal = %key, error = %e, "Failed to repair principal index");
                return;
            }
        }
    }
}
