//! Reference data used across the test suites.

use chrono::{DateTime, TimeDelta, Utc};
use queuedesk_core::catalog::{Category, Slot};
use crate::directories::InMemoryCategoryDirectory;

/// The `consultation` service, letter `A`.
#[must_use]
pub fn consultation() -> Category {
    Category::new("consultation", "A", "Consultation")
}

/// The `analysis` service, letter `B`.
#[must_use]
pub fn analysis() -> Category {
    Category::new("analysis", "B", "Lab analysis")
}

/// The `registration` service, letter `R`.
#[must_use]
pub fn registration() -> Category {
    Category::new("registration", "R", "Registration desk")
}

/// A directory holding the three standard categories.
#[must_use]
pub fn categories() -> InMemoryCategoryDirectory {
    InMemoryCategoryDirectory::with([consultation(), analysis(), registration()])
}

/// A slot in `room_number` starting at `starts_at` and lasting `minutes`.
#[must_use]
pub fn slot(id: i64, room_number: i32, starts_at: DateTime<Utc>, minutes: i64) -> Slot {
    Slot {
        id,
        room_number,
        doctor_name: "Dr. Ivanova".to_string(),
        specialization: "Therapist".to_string(),
        starts_at,
        ends_at: starts_at + TimeDelta::minutes(minutes),
    }
}
