//! Mock provider implementations for testing.

pub mod session;

pub use session::MockSessionStore;
