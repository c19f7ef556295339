//! Store and lookup traits.
//!
//! The dispatch service is the only writer of ticket state, but every write it makes
//! is a single atomic store operation:
//!
//! - [`TicketStore::create_ticket`] allocates a number and inserts under a per-letter lock
//! - [`TicketStore::claim_next`] / [`TicketStore::claim`] move Waiting → Invited with row
//!   locking, so two windows can never claim the same ticket
//! - [`TicketStore::transition`] / [`TicketStore::finalize`] are conditional on the current
//!   status, so a lost race is observed as "not in the expected status"
//!
//! Traits return boxed futures so they can be used as `Arc<dyn TicketStore>`.

use crate::catalog::{Category, Slot};
use crate::error::StoreError;
use crate::numbering::NumberingPolicy;
use crate::report::DailyReportRow;
use crate::ticket::{ReceptionLog, Ticket, TicketId, TicketStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Insert request for a new Waiting ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    /// Category the visitor selected
    pub category_id: String,
    /// Letter resolved from the category
    pub letter: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Numbering ceiling and wrap rule
    pub numbering: NumberingPolicy,
}

/// Fields written when a ticket is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Window or room the ticket is called to
    pub window_number: i32,
    /// Call time; also the reference time for priority tiers
    pub at: DateTime<Utc>,
}

/// A conditional status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Statuses the ticket must currently be in
    pub from: Vec<TicketStatus>,
    /// Target status
    pub to: TicketStatus,
    /// Time stamped on the matching timestamp column
    pub at: DateTime<Utc>,
}

/// Result of finalizing a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Ticket after the update
    pub ticket: Ticket,
    /// The reception log that was closed, if one was open
    pub closed_log: Option<ReceptionLog>,
}

/// A ticket waiting for, or inside, a doctor's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomQueueEntry {
    /// The InProgress or Registered ticket
    pub ticket: Ticket,
    /// Start of the slot the ticket is booked into
    pub appointment_at: DateTime<Utc>,
}

/// Durable ticket storage.
pub trait TicketStore: Send + Sync {
    /// Allocate the next number for the letter and insert a Waiting ticket, atomically.
    ///
    /// Returns `Ok(None)` when every number of the letter is held by an active ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn create_ticket(&self, new: NewTicket) -> StoreFuture<'_, Option<Ticket>>;

    /// Fetch a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn get_by_id(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// The Waiting ticket with the highest priority at `now`, without claiming it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn next_waiting<'a>(
        &'a self,
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Ticket>>;

    /// Atomically select the highest-priority Waiting ticket, mark it Invited and open
    /// a reception log. Concurrent callers never receive the same ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn claim_next<'a>(
        &'a self,
        prefix: Option<&'a str>,
        claim: Claim,
    ) -> StoreFuture<'a, Option<Ticket>>;

    /// Claim one ticket by id if it is still Waiting, opening a reception log.
    ///
    /// Returns `Ok(None)` if the ticket is missing or no longer Waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn claim(&self, id: TicketId, claim: Claim) -> StoreFuture<'_, Option<Ticket>>;

    /// Apply a non-terminal status change if the ticket is in one of `transition.from`.
    ///
    /// Moving to `InProgress` stamps `started_at`. Returns `Ok(None)` if the
    /// precondition did not hold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn transition(&self, id: TicketId, transition: Transition)
    -> StoreFuture<'_, Option<Ticket>>;

    /// Apply a terminal status change and close the most recent open reception log,
    /// in one transaction.
    ///
    /// `completed_at` is stamped only for `Completed`. Returns `Ok(None)` if the
    /// precondition did not hold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn finalize(&self, id: TicketId, transition: Transition)
    -> StoreFuture<'_, Option<Finalized>>;

    /// Hard-delete a ticket. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool>;

    /// Tickets in any of `statuses`, optionally filtered by number prefix, in priority
    /// order at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn list_by_status<'a>(
        &'a self,
        statuses: &'a [TicketStatus],
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<Ticket>>;

    /// The InProgress ticket linked, through its appointment, to a slot in `room_number`
    /// on the day of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn find_in_progress_for_room(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// The doctor-side queue of `room_number` on the day of `now`: tickets booked into
    /// the room's slots that are InProgress or Registered.
    ///
    /// InProgress comes first, then by slot start, then by ticket id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn room_queue(&self, room_number: i32, now: DateTime<Utc>)
    -> StoreFuture<'_, Vec<RoomQueueEntry>>;

    /// Reception logs of a ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn reception_logs(&self, id: TicketId) -> StoreFuture<'_, Vec<ReceptionLog>>;

    /// Report rows for tickets created on `day` (UTC).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn daily_report(&self, day: NaiveDate) -> StoreFuture<'_, Vec<DailyReportRow>>;
}

/// Category/service lookup.
pub trait CategoryDirectory: Send + Sync {
    /// Resolve a category id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn resolve<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Category>>;

    /// All categories, ordered by letter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn list(&self) -> StoreFuture<'_, Vec<Category>>;
}

/// Schedule lookup for the room projection and priority tiering.
pub trait ScheduleDirectory: Send + Sync {
    /// The slot running in `room_number` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_active_slot(&self, room_number: i32, now: DateTime<Utc>)
    -> StoreFuture<'_, Option<Slot>>;

    /// Start of the slot the ticket's appointment is booked into.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_appointment_time(&self, ticket_id: TicketId)
    -> StoreFuture<'_, Option<DateTime<Utc>>>;

    /// Every room number that has a slot, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn rooms(&self) -> StoreFuture<'_, Vec<i32>>;
}
