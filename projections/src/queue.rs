//! Doctor-side room queue projection.

use queuedesk_core::environment::Clock;
use queuedesk_core::notification::Envelope;
use queuedesk_core::projection::{Projection, ProjectionFuture, Result};
use queuedesk_core::store::{RoomQueueEntry, ScheduleDirectory, TicketStore};
use serde::Serialize;
use std::sync::Arc;

/// Today's patients of one room: the one inside, then the registered ones by slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomQueue {
    /// Room the view is for
    pub room_number: i32,
    /// InProgress first, then Registered by appointment time
    pub entries: Vec<RoomQueueEntry>,
}

/// Lists the tickets booked into a room's slots for the current day.
#[derive(Clone)]
pub struct RoomQueueProjection {
    tickets: Arc<dyn TicketStore>,
    schedule: Arc<dyn ScheduleDirectory>,
    clock: Arc<dyn Clock>,
}

impl RoomQueueProjection {
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

    /// Current queue of `room_number`. An unknown room has an empty queue.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn current_queue(&self, room_number: i32) -> Result<RoomQueue> {
        let entries = self
            .tickets
            .room_queue(room_number, self.clock.now())
            .await?;
        Ok(RoomQueue {
            room_number,
            entries,
        })
    }

    /// Rooms a doctor can pick, ascending.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn rooms(&self) -> Result<Vec<i32>> {
        Ok(self.schedule.rooms().await?)
    }
}

impl Projection for RoomQueueProjection {
    type Key = i32;
    type View = RoomQueue;

    fn name(&self) -> &str {
        "room_queue"
    }

    fn current<'a>(&'a self, room_number: &'a i32) -> ProjectionFuture<'a, RoomQueue> {
        Box::pin(self.current_queue(*room_number))
    }

    // Slot edits move bookings between rooms and days.
    fn concerns(&self, envelope: &Envelope) -> bool {
        envelope.concerns_tickets() || envelope.slot().is_some()
    }
}
