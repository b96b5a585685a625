//! # District Core
//!
//! Core traits and types shared by the district session services.
//!
//! The session subsystem follows a "functional core, imperative shell" split:
//! decisions (which sessions to evict, whether a login is allowed) are pure
//! functions over plain data, while all I/O goes through traits injected at
//! construction time. This crate holds the traits every other crate agrees on:
//!
//! - [`environment::Clock`]: time, injected so tests control `created_at` ordering
//! - [`event::Event`]: lifecycle events with a stable type identifier
//! - [`event_bus::EventBus`]: the outbound channel toward the audit pipeline
//!
//! ## Example
//!
//! ```
//! use district_core::environment::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let now = clock.now();
//! assert!(now.timestamp() > 0);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod event;
pub mod event_bus;

/// Environment traits injected into services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{DateTime, Utc};
    /// use district_core::environment::Clock;
    ///
    /// // Test - fixed time for deterministic tests
    /// struct Frozen(DateTime<Utc>);
    ///
    /// impl Clock for Frozen {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.0
    ///     }
    /// }
    ///
    /// let at = Utc::now();
    /// assert_eq!(Frozen(at).now(), at);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
