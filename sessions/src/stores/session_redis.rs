//! Redis-backed shared session store.
//!
//! # Architecture
//!
//! - **Record**: `<ns>:sessions:<session_id>` → bincode `SessionRecord`,
//!   `SET EX` with the inactivity timeout, slid with `EXPIRE` on access
//! - **Principal index**: `<ns>:principal-sessions:<principal>` (Set) → ids,
//!   TTL = inactivity timeout + 1 day so it outlives its sessions
//! - **Notifications**: keyevent pub/sub on `expired` and `del`, filtered to
//!   record keys of this namespace
//!
//! # Example
//!
//! ```no_run
//! use district_sessions::stores::RedisSessionStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisSessionStore::new("redis://127.0.0.1:6379", "district").await?;
//! store.configure_keyspace_events().await?;
//! # Ok(())
//! # }
//! ```

use crate::constants::{keyevents, keys};
use crate::error::{Result, SessionError};
use crate::providers::{NotificationKind, NotificationStream, ScanPage, SessionStore, StoreNotification};
use crate::state::{PrincipalKey, SessionId, SessionRecord};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Redis session store.
///
/// Cloning shares the connection manager.
#[derive(Clone)]
pub struct RedisSessionStore {
    client: Client,
    conn_manager: ConnectionManager,
    namespace: String,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `namespace` - Prefix of every key this store touches
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            SessionError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            SessionError::StoreUnavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            client,
            conn_manager,
            namespace: namespace.into(),
        })
    }

    /// Enable the keyevent notifications the expiration listener needs.
    ///
    /// Managed Redis offerings often forbid `CONFIG`; callers should treat a
    /// failure as a warning and configure the server out of band.
    ///
    /// # Errors
    ///
    /// Returns error if the `CONFIG SET` command is rejected.
    pub async fn configure_keyspace_events(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(keyevents::NOTIFY_FLAGS)
            .query_async(&mut conn)
            .await?;

        tracing::info!(flags = keyevents::NOTIFY_FLAGS, "Enabled Redis keyspace notifications");
        Ok(())
    }

    fn session_key(&self, session_id: &SessionId) -> String {
        keys::session_key(&self.namespace, session_id.as_str())
    }

    fn principal_key(&self, principal: &PrincipalKey) -> String {
        keys::principal_sessions_key(&self.namespace, principal.as_str())
    }

    fn index_ttl_secs(ttl: Duration) -> i64 {
        i64::try_from(ttl.as_secs().max(1) + keys::PRINCIPAL_INDEX_GRACE_SECS).unwrap_or(i64::MAX)
    }
}

impl SessionStore for RedisSessionStore {
    async fn save_session(&self, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let session_key = self.session_key(&record.session_id);
        let principal_key = self.principal_key(&record.principal.key());
        let bytes = record.to_bytes()?;

        let _: () = redis::pipe()
            .atomic()
            .set_ex(&session_key, bytes, ttl.as_secs().max(1))
            .sadd(&principal_key, record.session_id.as_str())
            .ignore()
            .expire(&principal_key, Self::index_ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            session_id = %record.session_id,
            principal = %record.principal.key(),
            ttl_seconds = ttl.as_secs(),
            "Saved session record"
        );
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        let bytes: Option<Vec<u8>> = conn.get(self.session_key(session_id)).await?;
        Ok(bytes)
    }

    async fn touch_session(&self, session_id: &SessionId, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let refreshed: bool = conn.expire(self.session_key(session_id), secs).await?;
        Ok(refreshed)
    }

    async fn delete_session(&self, principal: &PrincipalKey, session_id: &SessionId) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = redis::pipe()
            .atomic()
            .del(self.session_key(session_id))
            .ignore()
            .srem(self.principal_key(principal), session_id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(session_id = %session_id, "Deleted session record");
        Ok(())
    }

    async fn scan_sessions(&self, cursor: u64) -> Result<ScanPage> {
        let mut conn = self.conn_manager.clone();
        let prefix = keys::session_key_prefix(&self.namespace);

        let (next, found): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(format!("{prefix}*"))
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut conn)
            .await?;

        let session_ids = found
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(SessionId::from)
            .collect();

        Ok(ScanPage {
            cursor: next,
            session_ids,
        })
    }

    async fn index_session(&self, principal: &PrincipalKey, session_id: &SessionId, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let principal_key = self.principal_key(principal);

        let _: () = redis::pipe()
            .atomic()
            .sadd(&principal_key, session_id.as_str())
            .ignore()
            .expire(&principal_key, Self::index_ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn unindex_session(&self, principal: &PrincipalKey, session_id: &SessionId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .srem(self.principal_key(principal), session_id.as_str())
            .await?;
        Ok(())
    }

    async fn indexed_sessions(&self, principal: &PrincipalKey) -> Result<Vec<SessionId>> {
        let mut conn = self.conn_manager.clone();
        let members: Vec<String> = conn.smembers(self.principal_key(principal)).await?;
        Ok(members.into_iter().map(SessionId::from).collect())
    }

    async fn subscribe_notifications(&self) -> Result<NotificationStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(keyevents::EXPIRED_PATTERN).await?;
        pubsub.psubscribe(keyevents::DEL_PATTERN).await?;

        tracing::info!(namespace = %self.namespace, "Subscribed to Redis keyevent notifications");

        let prefix = keys::session_key_prefix(&self.namespace);
        let notifications = pubsub.into_on_message().filter_map(move |msg| {
            let kind = if msg.get_channel_name().ends_with(":expired") {
                Some(NotificationKind::Expired)
            } else if msg.get_channel_name().ends_with(":del") {
                Some(NotificationKind::Deleted)
            } else {
                None
            };
            let key: Option<String> = msg.get_payload().ok();
            let notification = kind.zip(key).and_then(|(kind, key)| {
                key.strip_prefix(&prefix).map(|id| StoreNotification {
                    session_id: SessionId::from(id),
                    kind,
                })
            });
            futures::future::ready(notification)
        });

        Ok(Box::pin(notifications))
    }
}
