//! Session providers.
//!
//! Traits for the external systems the session registry depends on. The
//! registry, reconciler and notifier are generic over these; the runtime picks
//! Redis, tests pick the in-memory mocks.
//!
//! The audit channel is not defined here: it is the shared
//! [`EventBus`](district_core::event_bus::EventBus).

pub mod session_store;

pub use session_store::{NotificationKind, NotificationStream, ScanPage, SessionStore, StoreNotification};
