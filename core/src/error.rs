//! Error taxonomy for dispatch and storage.
//!
//! [`DispatchError`] is what callers of the dispatch service see. Every variant maps
//! to a distinct client-visible outcome:
//!
//! | Variant | Meaning | Transport mapping |
//! |---------|---------|-------------------|
//! | `Validation` | bad input, rejected before touching the store | 400 |
//! | `NotFound` | id does not resolve | 404 |
//! | `InvalidState` | transition precondition violated | 400 |
//! | `EmptyQueue` | nobody eligible is waiting (a normal outcome) | 204 / "no one waiting" |
//! | `NumberingExhausted` | every number of a letter is held by an active ticket | 409 |
//! | `Store` | the store is unreachable or failed | 503 / "system unavailable" |

use crate::ticket::{TicketId, TicketStatus};
use thiserror::Error;

/// Errors raised by store and lookup implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, query or transaction failure
    #[error("Database error: {0}")]
    Database(String),

    /// A unique constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row could not be mapped to a domain type
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Errors returned by dispatch operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Input rejected before touching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// The ticket id does not exist
    #[error("Ticket {0} not found")]
    NotFound(TicketId),

    /// The ticket is not in a status the transition accepts
    #[error("Ticket {ticket_id} is {actual}, expected {}", join_statuses(.expected))]
    InvalidState {
        /// Ticket the transition targeted
        ticket_id: TicketId,
        /// Status found
        actual: TicketStatus,
        /// Statuses the transition accepts
        expected: Vec<TicketStatus>,
    },

    /// No eligible ticket is waiting
    #[error("No waiting tickets{}", prefix_suffix(.filter))]
    EmptyQueue {
        /// Category prefix the caller asked for
        filter: Option<String>,
    },

    /// Every sequence number for the letter is held by an active ticket
    #[error("All ticket numbers for letter {letter} are in use")]
    NumberingExhausted {
        /// Category letter
        letter: String,
    },

    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether this is the expected "nobody waiting" outcome.
    #[must_use]
    pub const fn is_empty_queue(&self) -> bool {
        matches!(self, Self::EmptyQueue { .. })
    }

    /// Whether the failure comes from the store rather than the request.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

fn join_statuses(statuses: &[TicketStatus]) -> String {
    statuses
        .iter()
        .map(TicketStatus::as_str)
        .collect::<Vec<_>>()
        .join(" or ")
}

#[allow(clippy::ref_option)]
fn prefix_suffix(filter: &Option<String>) -> String {
    filter
        .as_deref()
        .map(|f| format!(" for prefix {f}"))
        .unwrap_or_default()
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_names_expected_status() {
        let err = DispatchError::InvalidState {
            ticket_id: TicketId::new(5),
            actual: TicketStatus::Completed,
            expected: vec![TicketStatus::Invited, TicketStatus::InProgress],
        };
        assert_eq!(
            err.to_string(),
            "Ticket 5 is completed, expected invited or in_progress"
        );
    }

    #[test]
    fn empty_queue_is_distinguishable_from_outage() {
        let empty = DispatchError::EmptyQueue {
            filter: Some("A".to_string()),
        };
        let outage = DispatchError::from(StoreError::Database("connection refused".into()));

        assert!(empty.is_empty_queue());
        assert!(!empty.is_unavailable());
        assert!(outage.is_unavailable());
        assert!(!outage.is_empty_queue());
        assert_eq!(empty.to_string(), "No waiting tickets for prefix A");
    }
}
