//! Shared fixtures: a "node" is one server process wired to a shared store
//! and a shared audit bus.

#![allow(dead_code)]

use district_core::environment::Clock;
use district_sessions::{
    ExpirationListener, ExpirationNotifier, MockSessionStore, SessionId, SessionInformation,
    SessionLifecycle, SessionRegistry, SessionRegistryConfig,
};
use district_testing::{InMemoryEventBus, ManualClock, init_test_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Node {
    pub lifecycle: SessionLifecycle<MockSessionStore>,
    pub notifier: ExpirationNotifier<MockSessionStore>,
    pub clock: ManualClock,
    shutdown: Option<watch::Sender<bool>>,
}

impl Node {
    #[allow(clippy::unwrap_used)]
    pub fn new(store: &MockSessionStore, bus: &InMemoryEventBus, config: SessionRegistryConfig) -> Self {
        init_test_tracing();
        let clock = ManualClock::starting_at(test_clock().now());
        let registry = SessionRegistry::new(store.clone(), config, Arc::new(clock.clone())).unwrap();
        let notifier = ExpirationNotifier::new(registry.clone(), Arc::new(bus.clone()));
        Self {
            lifecycle: SessionLifecycle::new(registry, notifier.clone()),
            notifier,
            clock,
            shutdown: None,
        }
    }

    /// Start the expiration listener and give it time to subscribe.
    pub async fn listen(&mut self) {
        let (tx, rx) = watch::channel(false);
        ExpirationListener::new(self.notifier.clone())
            .with_retry_delay(Duration::from_millis(10))
            .spawn(rx);
        self.shutdown = Some(tx);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    pub fn registry(&self) -> &SessionRegistry<MockSessionStore> {
        self.lifecycle.registry()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}

/// Poll `condition` every 5ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn ids(sessions: &[SessionInformation]) -> Vec<&str> {
    sessions.iter().map(|s| s.session_id.as_str()).collect()
}

pub fn sid(id: &str) -> SessionId {
    SessionId::from(id)
}
