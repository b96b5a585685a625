//! Entry points called by the authentication layer.
//!
//! [`SessionLifecycle`] ties the registry, the policy and the notifier
//! together:
//!
//! ```text
//! authenticated ─▶ lookup sessions ─▶ policy ─┬─ Allow ────────────┐
//!                                             ├─ Evict(oldest) ─▶ evict ─┤
//!                                             └─ Reject ─▶ TooManySessions
//!                                                                  ▼
//!                                                          register new session
//! ```
//!
//! Eviction always completes before the new session is registered, so a
//! concurrent reader in this process never sees more than the limit.

use crate::error::{Result, SessionError};
use crate::notifier::ExpirationNotifier;
use crate::policy::{ConcurrentSessionPolicy, LoginDecision};
use crate::providers::{NotificationKind, SessionStore, StoreNotification};
use crate::registry::SessionRegistry;
use crate::state::{Principal, SessionId, SessionInformation, SessionStatus};
use district_runtime::metrics::{counter, names};

/// Outcome of checking a request's session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAccess {
    /// Session is active; its entry after the refresh.
    Active(SessionInformation),
    /// Session ended; the request must be treated as unauthenticated.
    Expired(SessionStatus),
    /// This process has never seen the session.
    Unknown,
}

/// Session lifecycle façade.
pub struct SessionLifecycle<S> {
    registry: SessionRegistry<S>,
    notifier: ExpirationNotifier<S>,
    policy: ConcurrentSessionPolicy,
}

impl<S> Clone for SessionLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            policy: self.policy,
        }
    }
}

impl<S: SessionStore> SessionLifecycle<S> {
    /// Create the façade. The policy comes from the registry configuration.
    #[must_use]
    pub fn new(registry: SessionRegistry<S>, notifier: ExpirationNotifier<S>) -> Self {
        let policy = ConcurrentSessionPolicy::from_config(registry.config());
        Self {
            registry,
            notifier,
            policy,
        }
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &ConcurrentSessionPolicy {
        &self.policy
    }

    /// Enforce the session limit for `principal`, then register
    /// `session_id`.
    ///
    /// If the principal's sessions cannot be determined because the store is
    /// unreachable, enforcement is skipped and the login proceeds.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TooManySessions`] when the limit is reached
    /// and new logins are blocked, and [`SessionError::SessionEnded`] when
    /// `session_id` already ended in this process.
    pub async fn on_authentication_success(
        &self,
        principal: Principal,
        session_id: SessionId,
    ) -> Result<SessionInformation> {
        if let Some(ended) = self
            .registry
            .get_session_information(&session_id)
            .filter(SessionInformation::is_expired)
        {
            return Err(Self::ended(ended));
        }

        match self.registry.lookup_sessions(&principal).await {
            Ok(lookup) => match self.policy.decide(&lookup.sessions) {
                LoginDecision::Allow => {}
                LoginDecision::Evict(victims) => {
                    for victim in &victims {
                        self.notifier.evict(victim).await;
                    }
                }
                LoginDecision::Reject { active, max } => {
                    counter!(names::LOGINS_REJECTED).increment(1);
                    tracing::warn!(
                        principal = %principal.key(),
                        active,
                        max,
                        "Rejected login: concurrent session limit reached"
                    );
                    return Err(SessionError::TooManySessions {
                        principal: principal.key(),
                        active,
                        max,
                    });
                }
            },
            Err(e) => {
                counter!(names::ENFORCEMENT_SKIPPED).increment(1);
                tracing::warn!(
                    principal = %principal.key(),
                    error = %e,
                    "Session store unavailable, skipping concurrent session enforcement"
                );
            }
        }

        let info = self.registry.register_new_session(session_id, principal).await;
        if info.is_expired() {
            return Err(Self::ended(info));
        }
        Ok(info)
    }

    fn ended(info: SessionInformation) -> SessionError {
        tracing::warn!(
            session_id = %info.session_id,
            status = info.status.as_str(),
            "Rejected login reusing an ended session id"
        );
        SessionError::SessionEnded {
            session_id: info.session_id,
            status: info.status,
        }
    }

    /// End a session on logout.
    ///
    /// Marks it `Removed` locally and deletes it from the store; the local
    /// entry stays until the terminal sweep purges it. A session this process
    /// never saw is looked up in the store so it can still be deleted.
    /// Returns `false` if the session was not found or had already ended.
    pub async fn on_logout(&self, session_id: &SessionId) -> bool {
        let principal = match self.registry.get_session_information(session_id) {
            Some(info) => {
                if self.registry.mark_terminal(session_id, SessionStatus::Removed).is_none() {
                    tracing::debug!(session_id = %session_id, status = info.status.as_str(), "Session already ended");
                    return false;
                }
                info.principal.key()
            }
            None => match self.registry.load_stored_session(session_id).await {
                Ok(Some(record)) => record.principal.key(),
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Could not resolve session owner on logout");
                    return false;
                }
            },
        };

        self.registry.delete_stored_session(&principal, session_id).await;
        tracing::info!(session_id = %session_id, principal = %principal, "Session logged out");
        true
    }

    /// Whether requests bearing `session_id` must be rejected.
    ///
    /// Answers from local state only; unknown sessions are not expired.
    #[must_use]
    pub fn is_expired(&self, session_id: &SessionId) -> bool {
        self.registry
            .get_session_information(session_id)
            .is_some_and(|info| info.is_expired())
    }

    /// Check and refresh a session on an authenticated request.
    ///
    /// Slides the store TTL. A store that answers "no such record" ends the
    /// session here, which covers expiry and deletion notifications that
    /// never arrived. A session registered while the store was down is
    /// written to the store instead. An unreachable store keeps the session
    /// active.
    pub async fn on_request(&self, session_id: &SessionId) -> SessionAccess {
        let Some(info) = self.registry.get_session_information(session_id) else {
            return SessionAccess::Unknown;
        };
        if info.is_expired() {
            return SessionAccess::Expired(info.status);
        }

        match self.registry.touch_stored_session(session_id).await {
            Ok(true) => {}
            Ok(false) => {
                if !self.registry.remirror(session_id).await {
                    tracing::info!(session_id = %session_id, "Session record missing from store, expiring");
                    self.notifier.on_store_notification(&StoreNotification {
                        session_id: session_id.clone(),
                        kind: NotificationKind::Expired,
                    });
                    return self
                        .registry
                        .get_session_information(session_id)
                        .map_or(SessionAccess::Unknown, |i| SessionAccess::Expired(i.status));
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Could not refresh session TTL");
            }
        }

        self.registry.refresh_last_request(session_id);
        self.registry
            .get_session_information(session_id)
            .map_or(SessionAccess::Unknown, |i| {
                if i.is_expired() {
                    SessionAccess::Expired(i.status)
                } else {
                    SessionAccess::Active(i)
                }
            })
    }
}
