//! In-memory [`EventBus`] that records everything published to it.

use async_stream::stream;
use district_core::event::SerializedEvent;
use district_core::event_bus::{EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Recording event bus for tests.
///
/// Every successful publish is kept (topic and event) and forwarded to live
/// subscribers. Publishing can be switched to fail to exercise callers'
/// best-effort paths.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    published: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
    sender: broadcast::Sender<(String, SerializedEvent)>,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            sender,
            fail_publishes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent publishes fail (`true`) or succeed (`false`).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Events published to `topic`, in publish order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Total number of successful publishes across all topics.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until at least `count` events were published to `topic`, or
    /// `within` elapses, then return what was published.
    ///
    /// Publishers that fire and forget (`tokio::spawn`) need this instead of
    /// an immediate [`published_to`](Self::published_to).
    pub async fn wait_for(&self, topic: &str, count: usize, within: Duration) -> Vec<SerializedEvent> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let events = self.published_to(topic);
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "publishing disabled by test".to_string(),
                });
            }

            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((topic.clone(), event.clone()));
            // No live subscribers is fine.
            let _ = self.sender.send((topic, event));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let mut receiver = self.sender.subscribe();

        Box::pin(async move {
            let events: EventStream = Box::pin(stream! {
                loop {
                    match receiver.recv().await {
                        Ok((topic, event)) if topics.contains(&topic) => yield Ok(event),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(events)
        })
    }
}
