//! # District Sessions
//!
//! Distributed session registry with concurrent-login control.
//!
//! Every server process keeps a local index of the sessions it has seen and
//! mirrors them into a shared store (Redis) so that any process can answer
//! "which sessions does this principal have?", including one that has just
//! started and has never seen the principal before.
//!
//! ## Features
//!
//! - **Concurrent-login limit**: evict the oldest sessions, or reject the
//!   new login, when a principal exceeds `max_sessions_per_principal`
//! - **Cold-cache reconciliation**: rebuild a principal's sessions from the
//!   store's principal index, falling back to a bounded scan
//! - **Expiry tracking**: store TTL expirations and deletions are applied to
//!   the local index through keyspace notifications
//! - **Audit events**: evictions (and optionally expiries) are published
//!   fire-and-forget to an [`EventBus`](district_core::event_bus::EventBus)
//! - **Fail-open**: an unreachable store never blocks a login or a request
//!
//! ## Architecture
//!
//! ```text
//! auth layer ─▶ SessionLifecycle ─▶ ConcurrentSessionPolicy (pure)
//!                    │
//!                    ├─▶ SessionRegistry ─▶ LocalSessionIndex (DashMap)
//!                    │        └─▶ GuardedStore ─▶ SessionStore (Redis)
//!                    │
//!                    └─▶ ExpirationNotifier ─▶ EventBus (audit)
//!                             ▲
//!          ExpirationListener ┘ (store notifications)
//! ```
//!
//! ## Example
//!
//! ```
//! use district_sessions::{
//!     ExpirationNotifier, MockSessionStore, Principal, SessionId, SessionLifecycle,
//!     SessionRegistry, SessionRegistryConfig,
//! };
//! use district_core::environment::SystemClock;
//! use district_testing::InMemoryEventBus;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = SessionRegistry::new(
//!     MockSessionStore::new(),
//!     SessionRegistryConfig::default().with_max_sessions(1),
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//! let notifier = ExpirationNotifier::new(registry.clone(), Arc::new(InMemoryEventBus::new()));
//! let lifecycle = SessionLifecycle::new(registry, notifier);
//!
//! let principal = Principal::new(7, "alice");
//! lifecycle.on_authentication_success(principal.clone(), SessionId::from("s1")).await.unwrap();
//! lifecycle.on_authentication_success(principal.clone(), SessionId::from("s2")).await.unwrap();
//!
//! assert!(lifecycle.is_expired(&SessionId::from("s1")));
//! assert!(!lifecycle.is_expired(&SessionId::from("s2")));
//! # });
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod index;
pub mod lifecycle;
pub mod notifier;
pub mod policy;
pub mod providers;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod stores;

mod guard;

/// In-memory store for tests.
#[cfg(feature = "test-utils")]
pub mod mocks;

pub use config::{SessionNodeConfig, SessionRegistryConfig};
pub use error::{Result, SessionError};
pub use events::SessionLifecycleEvent;
pub use index::LocalSessionIndex;
pub use lifecycle::{SessionAccess, SessionLifecycle};
pub use notifier::{ExpirationListener, ExpirationNotifier};
pub use policy::{ConcurrentSessionPolicy, LoginDecision};
pub use providers::{NotificationKind, SessionStore, StoreNotification};
pub use registry::{LookupSource, SessionLookup, SessionRegistry};
pub use state::{Principal, PrincipalKey, SessionId, SessionInformation, SessionRecord, SessionStatus};

#[cfg(feature = "test-utils")]
pub use mocks::MockSessionStore;
