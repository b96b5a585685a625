//! Redis implementations of the session store and the audit event bus.

pub mod audit_redis;
pub mod session_redis;

pub use audit_redis::RedisEventBus;
pub use session_redis::RedisSessionStore;
