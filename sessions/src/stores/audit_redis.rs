//! Redis pub/sub event bus for session audit events.
//!
//! Each topic is a Redis channel. Messages are JSON envelopes so consumers
//! outside Rust can route on `eventType` and read `metadata` directly:
//!
//! ```json
//! {"eventType":"concurrent-session-evicted","data":"<base64 bincode>","metadata":{...}}
//! ```
//!
//! Pub/sub is at-most-once: a subscriber that is not connected when an event
//! is published never sees it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use district_core::event::SerializedEvent;
use district_core::event_bus::{EventBus, EventBusError, EventStream};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Wire envelope of a published event.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    event_type: String,
    data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl Envelope {
    fn wrap(event: &SerializedEvent) -> Self {
        Self {
            event_type: event.event_type.clone(),
            data: BASE64.encode(&event.data),
            metadata: event.metadata.clone(),
        }
    }

    fn unwrap_event(self) -> Result<SerializedEvent, EventBusError> {
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| EventBusError::DeserializationFailed(format!("Invalid event payload: {e}")))?;
        Ok(SerializedEvent::new(self.event_type, data, self.metadata))
    }
}

fn decode_message(payload: &str) -> Result<SerializedEvent, EventBusError> {
    serde_json::from_str::<Envelope>(payload)
        .map_err(|e| EventBusError::DeserializationFailed(format!("Invalid event envelope: {e}")))?
        .unwrap_event()
}

/// Event bus publishing to Redis channels.
#[derive(Clone)]
pub struct RedisEventBus {
    client: Client,
    conn_manager: ConnectionManager,
    timeout: Duration,
}

impl RedisEventBus {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if Redis is unreachable.
    pub async fn new(redis_url: &str) -> Result<Self, EventBusError> {
        let client = Client::open(redis_url)
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self {
            client,
            conn_manager,
            timeout: Duration::from_secs(2),
        })
    }

    /// Set the publish timeout (default: 2 seconds).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl EventBus for RedisEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            let payload = serde_json::to_string(&Envelope::wrap(&event)).map_err(|e| {
                EventBusError::PublishFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to serialize event: {e}"),
                }
            })?;

            let mut conn = self.conn_manager.clone();
            let sent = tokio::time::timeout(self.timeout, conn.publish::<_, _, i64>(&topic, payload)).await;

            match sent {
                Ok(Ok(receivers)) => {
                    tracing::debug!(
                        topic = %topic,
                        event_type = %event.event_type,
                        receivers,
                        "Event published"
                    );
                    Ok(())
                }
                Ok(Err(e)) => Err(EventBusError::PublishFailed {
                    topic,
                    reason: e.to_string(),
                }),
                Err(_) => Err(EventBusError::PublishFailed {
                    topic,
                    reason: format!("timed out after {:?}", self.timeout),
                }),
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let subscription_failed = |reason: String| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };

            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| subscription_failed(e.to_string()))?;
            for topic in &topics {
                pubsub
                    .subscribe(topic)
                    .await
                    .map_err(|e| subscription_failed(e.to_string()))?;
            }

            tracing::info!(topics = ?topics, "Subscribed to audit channels");

            let stream = async_stream::stream! {
                let mut messages = pubsub.into_on_message();
                while let Some(msg) = messages.next().await {
                    yield msg
                        .get_payload::<String>()
                        .map_err(|e| EventBusError::DeserializationFailed(e.to_string()))
                        .and_then(|payload| decode_message(&payload));
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_payload_and_metadata() {
        let event = SerializedEvent::new(
            "concurrent-session-evicted".to_string(),
            vec![0, 1, 2, 255],
            Some(serde_json::json!({ "evictedSessionId": "s1" })),
        );

        let json = serde_json::to_value(Envelope::wrap(&event)).unwrap();
        assert_eq!(json["eventType"], "concurrent-session-evicted");
        assert_eq!(json["metadata"]["evictedSessionId"], "s1");

        let decoded = decode_message(&json.to_string()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn malformed_envelope_is_reported() {
        assert!(matches!(
            decode_message("not json"),
            Err(EventBusError::DeserializationFailed(_))
        ));
        assert!(matches!(
            decode_message(r#"{"eventType":"x","data":"***"}"#),
            Err(EventBusError::DeserializationFailed(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn publish_reaches_subscriber() {
        let bus = RedisEventBus::new("redis://127.0.0.1:6379").await.unwrap();
        let mut events = bus.subscribe(&["district-audit-test"]).await.unwrap();
        let event = SerializedEvent::new("session-expired".to_string(), vec![7], None);

        bus.publish("district-audit-test", &event).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received, event);
    }
}
