//! # Queuedesk Core
//!
//! Domain types and policies for the ticket dispatch and live-notification core.
//!
//! This crate holds everything that is independent of a concrete backend:
//!
//! - **Tickets**: [`ticket::Ticket`], its status machine and human-facing number
//! - **Reference data**: service categories and room schedules ([`catalog`])
//! - **Policies**: priority ordering ([`priority`]) and per-letter numbering ([`numbering`])
//! - **Seams**: store and lookup traits ([`store`]), the change feed ([`change_feed`])
//!   and pull-model projections ([`projection`])
//! - **Wire format**: the `{action, data}` notification envelope ([`notification`])
//!
//! ## Architecture
//!
//! ```text
//!  create / call / start / complete
//!              │
//!              ▼
//!        Ticket Store ──NOTIFY──► Bridge ──► Broker ──► observers (board, room screens)
//! ```
//!
//! Dispatch *performs* state changes against the store; the broker only carries
//! *observations* of them. The two paths are independent and observers must treat
//! the notification stream as eventually consistent.

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod change_feed;
pub mod error;
pub mod notification;
pub mod numbering;
pub mod priority;
pub mod projection;
pub mod report;
pub mod store;
pub mod ticket;

/// Environment module - injected dependencies that make dispatch deterministic in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Dispatch stamps `called_at`, `started_at` and `completed_at` from this clock
    /// rather than from the database, so durations are reproducible under test.
    ///
    /// # Examples
    ///
    /// ```
    /// use queuedesk_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
