//! In-memory ticket store.
//!
//! Every operation runs under one mutex, which gives the same atomicity the
//! Postgres store gets from row locks and advisory locks: concurrent claims never
//! return the same ticket and concurrent creates never issue the same number.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::directories::InMemoryScheduleDirectory;
use chrono::{DateTime, NaiveDate, Utc};
use queuedesk_core::error::StoreError;
use queuedesk_core::priority::{PriorityKey, day_bounds};
use queuedesk_core::report::DailyReportRow;
use queuedesk_core::store::{
    Claim, Finalized, NewTicket, RoomQueueEntry, StoreFuture, TicketStore, Transition,
};
use queuedesk_core::ticket::{ReceptionLog, Ticket, TicketId, TicketNumber, TicketStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    tickets: BTreeMap<TicketId, Ticket>,
    logs: Vec<ReceptionLog>,
    next_ticket_id: i64,
    next_log_id: i64,
    unavailable: bool,
}

/// In-memory [`TicketStore`] for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use queuedesk_testing::InMemoryTicketStore;
///
/// let store = InMemoryTicketStore::new();
/// assert_eq!(store.len(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<State>>,
    schedule: InMemoryScheduleDirectory,
}

impl InMemoryTicketStore {
    /// Create an empty store with its own schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that ranks tickets using `schedule`.
    #[must_use]
    pub fn with_schedule(schedule: InMemoryScheduleDirectory) -> Self {
        Self {
            state: Arc::default(),
            schedule,
        }
    }

    /// Schedule used for appointment lookups.
    #[must_use]
    pub const fn schedule(&self) -> &InMemoryScheduleDirectory {
        &self.schedule
    }

    /// Number of stored tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tickets.len()
    }

    /// Whether the store holds no tickets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored ticket, by id.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        self.state.lock().unwrap().tickets.values().cloned().collect()
    }

    /// Insert a ticket as-is, bypassing numbering (for seeding edge cases).
    pub fn seed(&self, ticket: Ticket) {
        let mut state = self.state.lock().unwrap();
        state.next_ticket_id = state.next_ticket_id.max(ticket.id.get());
        state.tickets.insert(ticket.id, ticket);
    }

    /// Make every subsequent operation fail with a database error, as during an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(StoreError::Database("connection refused".to_string()));
        }
        Ok(state)
    }

    fn priority_order<'t>(
        &self,
        tickets: impl Iterator<Item = &'t Ticket>,
        now: DateTime<Utc>,
    ) -> Vec<&'t Ticket> {
        let mut ranked: Vec<(PriorityKey, &Ticket)> = tickets
            .map(|t| {
                let key = PriorityKey::new(t, self.schedule.appointment_time(t.id), now);
                (key, t)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0));
        ranked.into_iter().map(|(_, t)| t).collect()
    }

    fn best_waiting(&self, state: &State, prefix: Option<&str>, now: DateTime<Utc>) -> Option<TicketId> {
        let eligible = state.tickets.values().filter(|t| {
            t.status == TicketStatus::Waiting && prefix.is_none_or(|p| t.number.matches_prefix(p))
        });
        self.priority_order(eligible, now).first().map(|t| t.id)
    }
}

fn claim_locked(state: &mut State, id: TicketId, claim: Claim) -> Option<Ticket> {
    let ticket = state.tickets.get_mut(&id)?;
    if ticket.status != TicketStatus::Waiting {
        return None;
    }
    ticket.status = TicketStatus::Invited;
    ticket.window_number = Some(claim.window_number);
    ticket.called_at = Some(claim.at);
    let claimed = ticket.clone();

    state.next_log_id += 1;
    let log = ReceptionLog {
        id: state.next_log_id,
        ticket_id: id,
        window_number: claim.window_number,
        called_at: claim.at,
        completed_at: None,
        duration_ms: None,
    };
    state.logs.push(log);
    Some(claimed)
}

fn transition_locked(state: &mut State, id: TicketId, transition: &Transition) -> Option<Ticket> {
    let ticket = state.tickets.get_mut(&id)?;
    if !transition.from.contains(&ticket.status) {
        return None;
    }
    ticket.status = transition.to;
    match transition.to {
        TicketStatus::InProgress => {
            ticket.started_at.get_or_insert(transition.at);
        }
        TicketStatus::Completed => {
            ticket.completed_at.get_or_insert(transition.at);
        }
        _ => {}
    }
    Some(ticket.clone())
}

impl TicketStore for InMemoryTicketStore {
    fn create_ticket(&self, new: NewTicket) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let same_letter = || {
                state
                    .tickets
                    .values()
                    .filter(|t| t.number.letter() == new.letter)
            };
            let last_issued = same_letter()
                .max_by_key(|t| (t.created_at, t.id))
                .map(|t| t.number.sequence());
            let active: Vec<u32> = same_letter()
                .filter(|t| TicketStatus::ACTIVE.contains(&t.status))
                .map(|t| t.number.sequence())
                .collect();

            let Some(sequence) = new
                .numbering
                .next_sequence(last_issued, |n| active.contains(&n))
            else {
                return Ok(None);
            };

            state.next_ticket_id += 1;
            let ticket = Ticket {
                id: TicketId::new(state.next_ticket_id),
                number: TicketNumber::new(new.letter, sequence),
                status: TicketStatus::Waiting,
                category_id: new.category_id,
                window_number: None,
                created_at: new.created_at,
                called_at: None,
                started_at: None,
                completed_at: None,
            };
            state.tickets.insert(ticket.id, ticket.clone());
            Ok(Some(ticket))
        })
    }

    fn get_by_id(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move { Ok(self.lock()?.tickets.get(&id).cloned()) })
    }

    fn next_waiting<'a>(
        &'a self,
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Ticket>> {
        Box::pin(async move {
            let state = self.lock()?;
            Ok(self
                .best_waiting(&state, prefix, now)
                .and_then(|id| state.tickets.get(&id).cloned()))
        })
    }

    fn claim_next<'a>(
        &'a self,
        prefix: Option<&'a str>,
        claim: Claim,
    ) -> StoreFuture<'a, Option<Ticket>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let Some(id) = self.best_waiting(&state, prefix, claim.at) else {
                return Ok(None);
            };
            Ok(claim_locked(&mut state, id, claim))
        })
    }

    fn claim(&self, id: TicketId, claim: Claim) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            Ok(claim_locked(&mut state, id, claim))
        })
    }

    fn transition(
        &self,
        id: TicketId,
        transition: Transition,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            Ok(transition_locked(&mut state, id, &transition))
        })
    }

    fn finalize(
        &self,
        id: TicketId,
        transition: Transition,
    ) -> StoreFuture<'_, Option<Finalized>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let Some(ticket) = transition_locked(&mut state, id, &transition) else {
                return Ok(None);
            };
            let closed_log = state
                .logs
                .iter_mut()
                .filter(|log| log.ticket_id == id && log.is_open())
                .max_by_key(|log| (log.called_at, log.id))
                .map(|log| {
                    log.close(transition.at);
                    log.clone()
                });
            Ok(Some(Finalized { ticket, closed_log }))
        })
    }

    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let removed = state.tickets.remove(&id).is_some();
            if removed {
                state.logs.retain(|log| log.ticket_id != id);
            }
            Ok(removed)
        })
    }

    fn list_by_status<'a>(
        &'a self,
        statuses: &'a [TicketStatus],
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            let state = self.lock()?;
            let matching = state.tickets.values().filter(|t| {
                statuses.contains(&t.status) && prefix.is_none_or(|p| t.number.matches_prefix(p))
            });
            Ok(self
                .priority_order(matching, now)
                .into_iter()
                .cloned()
                .collect())
        })
    }

    fn find_in_progress_for_room(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let state = self.lock()?;
            let (start, end) = day_bounds(now);
            Ok(state
                .tickets
                .values()
                .filter(|t| t.status == TicketStatus::InProgress)
                .filter(|t| {
                    self.schedule.appointment_slot(t.id).is_some_and(|slot| {
                        slot.room_number == room_number
                            && slot.starts_at >= start
                            && slot.starts_at < end
                    })
                })
                .max_by_key(|t| t.started_at)
                .cloned())
        })
    }

    fn room_queue(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<RoomQueueEntry>> {
        Box::pin(async move {
            let state = self.lock()?;
            let (start, end) = day_bounds(now);
            let mut entries: Vec<RoomQueueEntry> = state
                .tickets
                .values()
                .filter(|t| matches!(t.status, TicketStatus::InProgress | TicketStatus::Registered))
                .filter_map(|t| {
                    let slot = self.schedule.appointment_slot(t.id)?;
                    (slot.room_number == room_number
                        && slot.starts_at >= start
                        && slot.starts_at < end)
                        .then(|| RoomQueueEntry {
                            ticket: t.clone(),
                            appointment_at: slot.starts_at,
                        })
                })
                .collect();
            entries.sort_by_key(|e| {
                (
                    e.ticket.status != TicketStatus::InProgress,
                    e.appointment_at,
                    e.ticket.id,
                )
            });
            Ok(entries)
        })
    }

    fn reception_logs(&self, id: TicketId) -> StoreFuture<'_, Vec<ReceptionLog>> {
        Box::pin(async move {
            let state = self.lock()?;
            let mut logs: Vec<ReceptionLog> = state
                .logs
                .iter()
                .filter(|log| log.ticket_id == id)
                .cloned()
                .collect();
            logs.sort_by_key(|log| (log.called_at, log.id));
            Ok(logs)
        })
    }

    fn daily_report(&self, day: NaiveDate) -> StoreFuture<'_, Vec<DailyReportRow>> {
        Box::pin(async move {
            let state = self.lock()?;
            let mut rows = Vec::new();
            for ticket in state
                .tickets
                .values()
                .filter(|t| t.created_at.date_naive() == day)
            {
                let appointment_at = self.schedule.appointment_time(ticket.id);
                let row = |log: Option<&ReceptionLog>| DailyReportRow {
                    ticket_id: ticket.id,
                    ticket_number: ticket.number.clone(),
                    status: ticket.status,
                    appointment_at,
                    window_number: log.map(|l| l.window_number),
                    called_at: log.map(|l| l.called_at),
                    completed_at: log.and_then(|l| l.completed_at),
                    duration_ms: log.and_then(|l| l.duration_ms),
                };
                let mut logs: Vec<&ReceptionLog> =
                    state.logs.iter().filter(|l| l.ticket_id == ticket.id).collect();
                if logs.is_empty() {
                    rows.push(row(None));
                } else {
                    logs.sort_by_key(|l| (l.called_at, l.id));
                    rows.extend(logs.into_iter().map(|l| row(Some(l))));
                }
            }
            rows.sort_by(|a, b| {
                a.called_at
                    .is_none()
                    .cmp(&b.called_at.is_none())
                    .then(a.called_at.cmp(&b.called_at))
                    .then(a.ticket_id.cmp(&b.ticket_id))
            });
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;
    use queuedesk_core::environment::Clock;
    use queuedesk_core::numbering::NumberingPolicy;

    fn new_ticket(letter: &str, max: u32) -> NewTicket {
        NewTicket {
            category_id: "consultation".to_string(),
            letter: letter.to_string(),
            created_at: test_clock().now(),
            numbering: NumberingPolicy::new(max),
        }
    }

    #[tokio::test]
    async fn numbering_is_scoped_per_letter() {
        let store = InMemoryTicketStore::new();
        let a = store.create_ticket(new_ticket("A", 999)).await.unwrap().unwrap();
        let b = store.create_ticket(new_ticket("B", 999)).await.unwrap().unwrap();
        assert_eq!(a.number.to_string(), "A001");
        assert_eq!(b.number.to_string(), "B001");
    }

    #[tokio::test]
    async fn claim_only_succeeds_once() {
        let store = InMemoryTicketStore::new();
        let ticket = store.create_ticket(new_ticket("A", 999)).await.unwrap().unwrap();
        let claim = Claim {
            window_number: 1,
            at: test_clock().now(),
        };
        assert!(store.claim(ticket.id, claim).await.unwrap().is_some());
        assert!(store.claim(ticket.id, claim).await.unwrap().is_none());
        assert_eq!(store.reception_logs(ticket.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryTicketStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_by_id(TicketId::new(1)).await,
            Err(StoreError::Database(_))
        ));
    }
}
