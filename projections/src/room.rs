//! Per-room display projection.

use queuedesk_core::catalog::Slot;
use queuedesk_core::environment::Clock;
use queuedesk_core::notification::Envelope;
use queuedesk_core::projection::{Projection, ProjectionFuture, Result};
use queuedesk_core::store::{ScheduleDirectory, TicketStore};
use queuedesk_core::ticket::Ticket;
use serde::Serialize;
use std::sync::Arc;

/// What a room screen shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoomState {
    /// No schedule slot is running in the room
    NoSession {
        /// Room the view is for
        room_number: i32,
    },
    /// A slot is running and nobody is being served; waiting for the next patient
    Ready {
        /// Room the view is for
        room_number: i32,
        /// The running slot
        schedule: Slot,
    },
    /// A ticket is being served
    Serving {
        /// Room the view is for
        room_number: i32,
        /// The running slot
        schedule: Slot,
        /// The InProgress ticket
        ticket: Ticket,
    },
}

impl RoomState {
    /// Room the view is for.
    #[must_use]
    pub const fn room_number(&self) -> i32 {
        match self {
            Self::NoSession { room_number }
            | Self::Ready { room_number, .. }
            | Self::Serving { room_number, .. } => *room_number,
        }
    }

    /// The ticket being served, if any.
    #[must_use]
    pub const fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::Serving { ticket, .. } => Some(ticket),
            _ => None,
        }
    }
}

/// Derives [`RoomState`] from the schedule and ticket state.
#[derive(Clone)]
pub struct RoomProjection {
    tickets: Arc<dyn TicketStore>,
    schedule: Arc<dyn ScheduleDirectory>,
    clock: Arc<dyn Clock>,
}

impl RoomProjection {
    /// Create the projection.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        schedule: Arc<dyn ScheduleDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            schedule,
            clock,
        }
    }

    /// Current state of `room_number`.
    ///
    /// A room without a running slot is [`RoomState::NoSession`]; a running slot with
    /// nobody InProgress is [`RoomState::Ready`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`](queuedesk_core::projection::ProjectionError::Storage)
    /// if a lookup fails.
    pub async fn current_state(&self, room_number: i32) -> Result<RoomState> {
        let now = self.clock.now();
        let Some(schedule) = self.schedule.find_active_slot(room_number, now).await? else {
            return Ok(RoomState::NoSession { room_number });
        };

        let state = match self.tickets.find_in_progress_for_room(room_number, now).await? {
            Some(ticket) => RoomState::Serving {
                room_number,
                schedule,
                ticket,
            },
            None => RoomState::Ready {
                room_number,
                schedule,
            },
        };
        Ok(state)
    }
}

impl Projection for RoomProjection {
    type Key = i32;
    type View = RoomState;

    fn name(&self) -> &str {
        "room_screen"
    }

    fn current<'a>(&'a self, room_number: &'a i32) -> ProjectionFuture<'a, RoomState> {
        Box::pin(self.current_state(*room_number))
    }

    fn concerns(&self, envelope: &Envelope) -> bool {
        envelope.concerns_tickets() || envelope.slot().is_some()
    }
}
