//! Outbound event channel.
//!
//! Session lifecycle events leave the process through an [`EventBus`]. The
//! session subsystem only ever publishes; subscription exists for the
//! consumers on the other side (the audit pipeline, tests, diagnostics).
//!
//! Delivery is best-effort from the publisher's point of view: a failed
//! publish is logged by the caller and never retried synchronously, so
//! implementations should fail fast rather than buffer indefinitely.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`district-testing`) - captures events for assertions
//! - `RedisEventBus` (`district-sessions`) - Redis pub/sub channels

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to decode an event received from the transport
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Stream of events from subscriptions.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe transport for lifecycle events.
///
/// Uses boxed futures rather than `async fn` so it can be held as
/// `Arc<dyn EventBus>`; the session services are not generic over their
/// audit sink.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
