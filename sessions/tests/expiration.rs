//! Store-driven expiry reaching the local index.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration as ChronoDuration;
use common::{Node, eventually, sid};
use district_sessions::constants::{DEFAULT_AUDIT_TOPIC, event_types};
use district_sessions::{MockSessionStore, Principal, SessionAccess, SessionRegistryConfig, SessionStatus};
use district_testing::InMemoryEventBus;
use std::time::Duration;

fn grace() -> Principal {
    Principal::new(8, "grace")
}

#[tokio::test]
async fn ttl_expiry_marks_local_session_expired() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let mut node = Node::new(&store, &bus, SessionRegistryConfig::default());
    node.listen().await;
    node.lifecycle.on_authentication_success(grace(), sid("s1")).await.unwrap();

    store.expire(&sid("s1"));

    assert!(eventually(Duration::from_secs(1), || node.lifecycle.is_expired(&sid("s1"))).await);
    assert_eq!(
        node.lifecycle.on_request(&sid("s1")).await,
        SessionAccess::Expired(SessionStatus::ExpiredByTtl)
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.published_count(), 0);
}

#[tokio::test]
async fn expiry_events_are_published_when_enabled() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let mut node = Node::new(&store, &bus, SessionRegistryConfig::default().with_expiry_events(true));
    node.listen().await;
    node.lifecycle.on_authentication_success(grace(), sid("s1")).await.unwrap();

    store.expire(&sid("s1"));

    let events = bus.wait_for(DEFAULT_AUDIT_TOPIC, 1, Duration::from_secs(1)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, event_types::SESSION_EXPIRED);
    assert_eq!(events[0].metadata.as_ref().unwrap()["sessionId"], "s1");
}

#[tokio::test]
async fn external_delete_ends_session() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let mut node = Node::new(&store, &bus, SessionRegistryConfig::default());
    node.listen().await;
    node.lifecycle.on_authentication_success(grace(), sid("s1")).await.unwrap();

    store.delete_externally(&sid("s1"));

    assert!(eventually(Duration::from_secs(1), || node.lifecycle.is_expired(&sid("s1"))).await);
    assert_eq!(
        node.registry().get_session_information(&sid("s1")).unwrap().status,
        SessionStatus::Removed
    );
}

#[tokio::test]
async fn terminal_sessions_are_purged_after_inactivity_timeout() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let mut node = Node::new(&store, &bus, SessionRegistryConfig::default());
    node.listen().await;
    node.lifecycle.on_authentication_success(grace(), sid("s1")).await.unwrap();
    node.lifecycle.on_authentication_success(grace(), sid("s2")).await.unwrap();
    assert!(node.lifecycle.is_expired(&sid("s1")));

    assert_eq!(node.registry().purge_terminal_sessions(), 0);
    node.clock.advance(ChronoDuration::minutes(31));
    assert_eq!(node.registry().purge_terminal_sessions(), 1);

    assert!(node.registry().get_session_information(&sid("s1")).is_none());
    assert!(node.registry().get_session_information(&sid("s2")).is_some());
}

#[tokio::test]
async fn unknown_expiry_is_ignored() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let mut node = Node::new(&store, &bus, SessionRegistryConfig::default().with_expiry_events(true));
    node.listen().await;
    let other = Node::new(&store, &bus, SessionRegistryConfig::default());
    other.lifecycle.on_authentication_success(grace(), sid("elsewhere")).await.unwrap();

    store.expire(&sid("elsewhere"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(node.registry().get_session_information(&sid("elsewhere")).is_none());
    assert_eq!(bus.published_count(), 0);
}
