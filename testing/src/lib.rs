//! # Queuedesk Testing
//!
//! Testing utilities for the dispatch and notification core.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory implementations of the store and lookup traits
//! - A scripted change feed with injectable connection failures
//! - Fixtures for categories and schedule slots
//!
//! ## Example
//!
//! ```ignore
//! use queuedesk_testing::{InMemoryTicketStore, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn calls_first_waiting_ticket() {
//!     let store = InMemoryTicketStore::new();
//!     let categories = fixtures::categories();
//!     let dispatch = DispatchService::new(store, categories, test_clock());
//!
//!     dispatch.create_ticket("consultation").await?;
//!     let ticket = dispatch.call_next(1, None).await?;
//!     assert_eq!(ticket.number.to_string(), "A001");
//! }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use queuedesk_core::environment::Clock;
use std::sync::{Arc, Mutex};

pub mod change_feed;
pub mod directories;
pub mod fixtures;
pub mod ticket_store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Mutex, TimeDelta, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use queuedesk_testing::mocks::FixedClock;
    /// use queuedesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another
    /// to the service under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: TimeDelta) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an absolute time.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 10:00:00 UTC, mid-morning
    /// so appointment windows on either side fall on the same day)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly tracing subscriber (idempotent).
///
/// Honors `RUST_LOG`; output goes through the test harness capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use change_feed::{FeedScript, ScriptedFeedConnector};
pub use directories::{InMemoryCategoryDirectory, InMemoryScheduleDirectory};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use ticket_store::InMemoryTicketStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        handle.advance(TimeDelta::minutes(3));
        assert_eq!(clock.now(), test_clock().now() + TimeDelta::minutes(3));
    }
}
