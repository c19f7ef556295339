//! In-memory category and schedule lookups.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use queuedesk_core::catalog::{Category, Slot};
use queuedesk_core::store::{CategoryDirectory, ScheduleDirectory, StoreFuture};
use queuedesk_core::ticket::TicketId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// In-memory category directory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCategoryDirectory {
    categories: Arc<RwLock<BTreeMap<String, Category>>>,
}

impl InMemoryCategoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory holding `categories`.
    #[must_use]
    pub fn with(categories: impl IntoIterator<Item = Category>) -> Self {
        let directory = Self::new();
        for category in categories {
            directory.insert(category);
        }
        directory
    }

    /// Add or replace a category.
    pub fn insert(&self, category: Category) {
        self.categories
            .write()
            .unwrap()
            .insert(category.id.clone(), category);
    }
}

impl CategoryDirectory for InMemoryCategoryDirectory {
    fn resolve<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Category>> {
        Box::pin(async move { Ok(self.categories.read().unwrap().get(id).cloned()) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Category>> {
        Box::pin(async move {
            let mut categories: Vec<Category> =
                self.categories.read().unwrap().values().cloned().collect();
            categories.sort_by(|a, b| a.letter.cmp(&b.letter));
            Ok(categories)
        })
    }
}

#[derive(Debug, Default)]
struct Schedule {
    slots: BTreeMap<i64, Slot>,
    appointments: HashMap<TicketId, i64>,
}

/// In-memory schedule: slots plus ticket→slot appointment bookings.
///
/// The in-memory ticket store reads the same schedule to rank tickets and to find
/// the ticket in progress for a room.
#[derive(Clone, Debug, Default)]
pub struct InMemoryScheduleDirectory {
    schedule: Arc<RwLock<Schedule>>,
}

impl InMemoryScheduleDirectory {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a slot.
    pub fn add_slot(&self, slot: Slot) {
        self.schedule.write().unwrap().slots.insert(slot.id, slot);
    }

    /// Book a ticket into a slot.
    pub fn book(&self, ticket_id: TicketId, slot_id: i64) {
        self.schedule
            .write()
            .unwrap()
            .appointments
            .insert(ticket_id, slot_id);
    }

    /// Slot the ticket is booked into.
    #[must_use]
    pub fn appointment_slot(&self, ticket_id: TicketId) -> Option<Slot> {
        let schedule = self.schedule.read().unwrap();
        schedule
            .appointments
            .get(&ticket_id)
            .and_then(|slot_id| schedule.slots.get(slot_id))
            .cloned()
    }

    /// Start of the slot the ticket is booked into.
    #[must_use]
    pub fn appointment_time(&self, ticket_id: TicketId) -> Option<DateTime<Utc>> {
        self.appointment_slot(ticket_id).map(|slot| slot.starts_at)
    }
}

impl ScheduleDirectory for InMemoryScheduleDirectory {
    fn find_active_slot(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Slot>> {
        Box::pin(async move {
            Ok(self
                .schedule
                .read()
                .unwrap()
                .slots
                .values()
                .filter(|slot| slot.room_number == room_number && slot.is_active_at(now))
                .min_by_key(|slot| slot.starts_at)
                .cloned())
        })
    }

    fn find_appointment_time(
        &self,
        ticket_id: TicketId,
    ) -> StoreFuture<'_, Option<DateTime<Utc>>> {
        Box::pin(async move { Ok(self.appointment_time(ticket_id)) })
    }

    fn rooms(&self) -> StoreFuture<'_, Vec<i32>> {
        Box::pin(async move {
            let mut rooms: Vec<i32> = self
                .schedule
                .read()
                .unwrap()
                .slots
                .values()
                .map(|slot| slot.room_number)
                .collect();
            rooms.sort_unstable();
            rooms.dedup();
            Ok(rooms)
        })
    }
}
