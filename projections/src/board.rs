//! Waiting-room and registrar board projection.

use queuedesk_core::environment::Clock;
use queuedesk_core::projection::{Projection, ProjectionError, ProjectionFuture, Result};
use queuedesk_core::store::TicketStore;
use queuedesk_core::ticket::{Ticket, TicketStatus, normalize_prefix};
use serde::Serialize;
use std::sync::Arc;

/// Active tickets, in call order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaitingBoard {
    /// Invited tickets with their windows
    pub called: Vec<Ticket>,
    /// Waiting tickets; the first is called next
    pub waiting: Vec<Ticket>,
}

/// Lists Waiting and Invited tickets, optionally for one category prefix.
#[derive(Clone)]
pub struct WaitingBoardProjection {
    tickets: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl WaitingBoardProjection {
    /// Create the projection.
    #[must_use]
    pub fn new(tickets: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { tickets, clock }
    }

    /// Current board for `prefix` (all categories when `None` or blank).
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::InvalidKey`] if `prefix` is not a short alphanumeric prefix
    /// - a storage error if the listing fails
    pub async fn current_board(&self, prefix: Option<&str>) -> Result<WaitingBoard> {
        let prefix =
            normalize_prefix(prefix).map_err(|e| ProjectionError::InvalidKey(e.to_string()))?;
        let tickets = self
            .tickets
            .list_by_status(&TicketStatus::ON_BOARD, prefix, self.clock.now())
            .await?;
        let (called, waiting) = tickets
            .into_iter()
            .partition(|t| t.status == TicketStatus::Invited);
        Ok(WaitingBoard { called, waiting })
    }
}

impl Projection for WaitingBoardProjection {
    type Key = Option<String>;
    type View = WaitingBoard;

    fn name(&self) -> &str {
        "waiting_board"
    }

    fn current<'a>(&'a self, prefix: &'a Option<String>) -> ProjectionFuture<'a, WaitingBoard> {
        Box::pin(self.current_board(prefix.as_deref()))
    }
}
