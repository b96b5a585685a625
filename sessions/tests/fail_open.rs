//! Behaviour while the shared store or the audit channel is unavailable.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration as ChronoDuration;
use common::{Node, ids, sid};
use district_sessions::constants::DEFAULT_AUDIT_TOPIC;
use district_sessions::{MockSessionStore, Principal, SessionAccess, SessionRegistryConfig, SessionStatus};
use district_testing::InMemoryEventBus;
use std::time::{Duration, Instant};

fn erin() -> Principal {
    Principal::new(5, "erin")
}

#[tokio::test]
async fn login_succeeds_while_store_is_down() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(&store, &bus, SessionRegistryConfig::default());
    store.set_unavailable(true);

    let info = node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();

    assert_eq!(info.status, SessionStatus::Active);
    assert!(!node.lifecycle.is_expired(&sid("s1")));
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn local_enforcement_continues_during_outage() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(&store, &bus, SessionRegistryConfig::default().with_max_sessions(1));
    node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();
    store.set_unavailable(true);

    node.clock.advance(ChronoDuration::seconds(1));
    node.lifecycle.on_authentication_success(erin(), sid("s2")).await.unwrap();

    assert!(node.lifecycle.is_expired(&sid("s1")));
    assert!(!node.lifecycle.is_expired(&sid("s2")));
    assert_eq!(bus.wait_for(DEFAULT_AUDIT_TOPIC, 1, Duration::from_secs(1)).await.len(), 1);
}

#[tokio::test]
async fn requests_stay_active_while_store_is_down() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(&store, &bus, SessionRegistryConfig::default());
    node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();
    store.set_unavailable(true);

    node.clock.advance(ChronoDuration::minutes(45));
    let access = node.lifecycle.on_request(&sid("s1")).await;

    assert!(matches!(access, SessionAccess::Active(_)));
    assert!(!node.lifecycle.is_expired(&sid("s1")));
}

#[tokio::test]
async fn cold_node_answers_empty_instead_of_failing() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let origin = Node::new(&store, &bus, SessionRegistryConfig::default());
    origin.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();
    store.set_unavailable(true);

    let fresh = Node::new(&store, &bus, SessionRegistryConfig::default());

    assert!(fresh.registry().lookup_sessions(&erin()).await.is_err());
    assert!(fresh.registry().get_all_sessions(&erin(), false).await.is_empty());
    assert!(!fresh.lifecycle.is_expired(&sid("s1")));
}

#[tokio::test]
async fn slow_store_does_not_delay_login() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(
        &store,
        &bus,
        SessionRegistryConfig::default().with_store_timeout(Duration::from_millis(50)),
    );
    store.set_latency(Duration::from_millis(500));

    let started = Instant::now();
    node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!node.lifecycle.is_expired(&sid("s1")));
}

#[tokio::test]
async fn open_circuit_keeps_logins_flowing() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(&store, &bus, SessionRegistryConfig::default().with_max_sessions(100));
    store.set_unavailable(true);

    for n in 0..10 {
        let principal = Principal::new(100 + n, format!("user{n}"));
        node.lifecycle
            .on_authentication_success(principal, sid(&format!("s{n}")))
            .await
            .unwrap();
    }

    assert_eq!(node.registry().local_len(), 10);
}

#[tokio::test]
async fn audit_outage_does_not_block_eviction() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    bus.fail_publishes(true);
    let node = Node::new(&store, &bus, SessionRegistryConfig::default());

    node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();
    node.clock.advance(ChronoDuration::seconds(1));
    node.lifecycle.on_authentication_success(erin(), sid("s2")).await.unwrap();

    assert!(node.lifecycle.is_expired(&sid("s1")));
    assert_eq!(ids(&node.registry().get_all_sessions(&erin(), false).await), vec!["s2"]);
}

#[tokio::test]
async fn store_recovery_restores_mirroring() {
    let store = MockSessionStore::new();
    let bus = InMemoryEventBus::new();
    let node = Node::new(&store, &bus, SessionRegistryConfig::default());
    store.set_unavailable(true);
    node.lifecycle.on_authentication_success(erin(), sid("s1")).await.unwrap();
    store.set_unavailable(false);

    node.lifecycle
        .on_authentication_success(Principal::new(6, "frank"), sid("f1"))
        .await
        .unwrap();

    assert!(!store.contains(&sid("s1")));
    assert!(store.contains(&sid("f1")));
}
