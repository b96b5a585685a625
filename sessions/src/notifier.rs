//! Session expiry: eviction, store notifications and the listener task.
//!
//! [`ExpirationNotifier`] turns "this session must end" into a local status
//! change plus, for evictions, exactly one audit event. Events go out
//! fire-and-forget: the caller never waits on the audit channel and a failed
//! publish is logged and counted, not retried.
//!
//! [`ExpirationListener`] feeds store-side expiries and deletions (from any
//! process) into the notifier, resubscribing when the stream drops.

use crate::events::SessionLifecycleEvent;
use crate::providers::{NotificationKind, SessionStore, StoreNotification};
use crate::registry::SessionRegistry;
use crate::state::{SessionInformation, SessionStatus};
use district_core::event_bus::EventBus;
use district_runtime::metrics::{counter, names};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Applies session expiry and emits lifecycle events.
pub struct ExpirationNotifier<S> {
    registry: SessionRegistry<S>,
    event_bus: Arc<dyn EventBus>,
}

impl<S> Clone for ExpirationNotifier<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}

impl<S: SessionStore> ExpirationNotifier<S> {
    /// Create a notifier publishing to `event_bus`.
    #[must_use]
    pub fn new(registry: SessionRegistry<S>, event_bus: Arc<dyn EventBus>) -> Self {
        Self { registry, event_bus }
    }

    /// Evict an active session.
    ///
    /// Marks it `Evicted` locally, deletes its store record (best-effort) and
    /// publishes one `concurrent-session-evicted` event. Evicting a session
    /// that is unknown or already terminal does nothing and returns `false`.
    pub async fn evict(&self, session: &SessionInformation) -> bool {
        let Some(before) = self
            .registry
            .mark_terminal(&session.session_id, SessionStatus::Evicted)
        else {
            tracing::debug!(session_id = %session.session_id, "Session already terminal, not evicting");
            return false;
        };

        counter!(names::SESSIONS_EVICTED).increment(1);
        tracing::info!(
            session_id = %before.session_id,
            principal = %before.principal.key(),
            created_at = %before.created_at,
            "Evicted session for exceeding concurrent session limit"
        );

        self.registry
            .delete_stored_session(&before.principal.key(), &before.session_id)
            .await;

        self.publish(SessionLifecycleEvent::evicted(
            &before.principal,
            before.session_id,
            self.registry.now(),
        ));
        true
    }

    /// Apply a store-side expiry or deletion locally.
    ///
    /// Returns `true` if a local session changed status. Must run inside a
    /// Tokio runtime when expiry events are enabled.
    pub fn on_store_notification(&self, notification: &StoreNotification) -> bool {
        let status = match notification.kind {
            NotificationKind::Expired => SessionStatus::ExpiredByTtl,
            NotificationKind::Deleted => SessionStatus::Removed,
        };

        let Some(before) = self.registry.mark_terminal(&notification.session_id, status) else {
            return false;
        };

        counter!(names::SESSIONS_EXPIRED, "cause" => status.as_str()).increment(1);
        tracing::info!(
            session_id = %before.session_id,
            principal = %before.principal.key(),
            status = status.as_str(),
            "Session ended in shared store"
        );

        if status == SessionStatus::ExpiredByTtl && self.registry.config().publish_expiry_events {
            self.publish(SessionLifecycleEvent::expired(
                &before.principal,
                before.session_id,
                self.registry.now(),
            ));
        }
        true
    }

    fn publish(&self, event: SessionLifecycleEvent) {
        let wire = match event.to_serialized() {
            Ok(wire) => wire,
            Err(e) => {
                counter!(names::AUDIT_PUBLISH_FAILURES).increment(1);
                tracing::warn!(error = %e, "Failed to encode lifecycle event");
                return;
            }
        };

        let event_bus = Arc::clone(&self.event_bus);
        let topic = self.registry.config().audit_topic.clone();
        tokio::spawn(async move {
            if let Err(e) = event_bus.publish(&topic, &wire).await {
                counter!(names::AUDIT_PUBLISH_FAILURES).increment(1);
                tracing::warn!(
                    topic = %topic,
                    event_type = %wire.event_type,
                    error = %e,
                    "Failed to publish lifecycle event"
                );
            }
        });
    }
}

/// Background task forwarding store notifications to an
/// [`ExpirationNotifier`].
pub struct ExpirationListener<S> {
    notifier: ExpirationNotifier<S>,
    retry_delay: Duration,
}

impl<S: SessionStore> ExpirationListener<S> {
    /// Create a listener driving `notifier`.
    #[must_use]
    pub const fn new(notifier: ExpirationNotifier<S>) -> Self {
        Self {
            notifier,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Wait between resubscription attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.notifier.registry.subscribe_notifications().await {
                Ok(mut notifications) => {
                    tracing::info!("Subscribed to session store notifications");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                tracing::info!("Expiration listener stopping");
                                return;
                            }
                            next = notifications.next() => match next {
                                Some(notification) => {
                                    self.notifier.on_store_notification(&notification);
                                }
                                None => {
                                    tracing::warn!("Session store notification stream ended, resubscribing");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis(),
                        "Failed to subscribe to session store notifications"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SessionRegistryConfig;
    use crate::constants::{DEFAULT_AUDIT_TOPIC, event_types};
    use crate::mocks::MockSessionStore;
    use crate::state::{Principal, SessionId};
    use district_testing::{InMemoryEventBus, test_clock};

    #[allow(clippy::type_complexity)]
    fn setup(config: SessionRegistryConfig) -> (MockSessionStore, SessionRegistry<MockSessionStore>, InMemoryEventBus, ExpirationNotifier<MockSessionStore>) {
        let store = MockSessionStore::new();
        let registry = SessionRegistry::new(store.clone(), config, Arc::new(test_clock())).unwrap();
        let bus = InMemoryEventBus::new();
        let notifier = ExpirationNotifier::new(registry.clone(), Arc::new(bus.clone()));
        (store, registry, bus, notifier)
    }

    #[tokio::test]
    async fn test_evict_publishes_once() {
        let (store, registry, bus, notifier) = setup(SessionRegistryConfig::default());
        let info = registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;

        assert!(notifier.evict(&info).await);
        assert!(!notifier.evict(&info).await);

        let events = bus
            .wait_for(DEFAULT_AUDIT_TOPIC, 1, Duration::from_secs(1))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(events.len(), 1);
        assert_eq!(bus.published_to(DEFAULT_AUDIT_TOPIC).len(), 1);
        assert_eq!(events[0].event_type, event_types::CONCURRENT_SESSION_EVICTED);
        assert!(!store.contains(&SessionId::from("s1")));
        assert_eq!(
            registry.get_session_information(&SessionId::from("s1")).map(|i| i.status),
            Some(SessionStatus::Evicted)
        );
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_undo_eviction() {
        let (_store, registry, bus, notifier) = setup(SessionRegistryConfig::default());
        bus.fail_publishes(true);
        let info = registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;

        assert!(notifier.evict(&info).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(bus.published_count(), 0);
        assert!(registry
            .get_session_information(&SessionId::from("s1"))
            .is_some_and(|i| i.is_expired()));
    }

    #[tokio::test]
    async fn test_deleted_notification_does_not_override_eviction() {
        let (_store, registry, _bus, notifier) = setup(SessionRegistryConfig::default());
        let info = registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;
        notifier.evict(&info).await;

        let changed = notifier.on_store_notification(&StoreNotification {
            session_id: SessionId::from("s1"),
            kind: NotificationKind::Deleted,
        });

        assert!(!changed);
        assert_eq!(
            registry.get_session_information(&SessionId::from("s1")).map(|i| i.status),
            Some(SessionStatus::Evicted)
        );
    }

    #[tokio::test]
    async fn test_expiry_events_only_when_enabled() {
        let (_store, registry, bus, notifier) =
            setup(SessionRegistryConfig::default().with_max_sessions(2).with_expiry_events(true));
        registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;

        assert!(notifier.on_store_notification(&StoreNotification {
            session_id: SessionId::from("s1"),
            kind: NotificationKind::Expired,
        }));

        let events = bus.wait_for(DEFAULT_AUDIT_TOPIC, 1, Duration::from_secs(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn test_listener_applies_store_expiry_and_stops() {
        let (store, registry, _bus, notifier) = setup(SessionRegistryConfig::default());
        registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ExpirationListener::new(notifier)
            .with_retry_delay(Duration::from_millis(10))
            .spawn(shutdown_rx);

        // Give the listener time to subscribe.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.expire(&SessionId::from("s1"));

        let mut status = None;
        for _ in 0..100 {
            status = registry.get_session_information(&SessionId::from("s1")).map(|i| i.status);
            if status == Some(SessionStatus::ExpiredByTtl) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, Some(SessionStatus::ExpiredByTtl));

        shutdown_tx.send(true).unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_listener_retries_while_store_is_down() {
        let (store, registry, _bus, notifier) = setup(SessionRegistryConfig::default());
        store.set_unavailable(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ExpirationListener::new(notifier)
            .with_retry_delay(Duration::from_millis(10))
            .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_unavailable(false);
        registry
            .register_new_session(SessionId::from("s1"), Principal::new(1, "u1"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.delete_externally(&SessionId::from("s1"));

        let mut status = None;
        for _ in 0..100 {
            status = registry.get_session_information(&SessionId::from("s1")).map(|i| i.status);
            if status == Some(SessionStatus::Removed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, Some(SessionStatus::Removed));

        shutdown_tx.send(true).unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());
    }
}
