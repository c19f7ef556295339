//! Reference data owned by external collaborators: service categories and room schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A visitor-selectable service, mapped to a ticket-number letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Stable identifier, e.g. `consultation`
    pub id: String,
    /// Ticket-number prefix, e.g. `A`
    pub letter: String,
    /// Name shown on the kiosk
    pub display_name: String,
}

impl Category {
    /// Create a category.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        letter: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            letter: letter.into(),
            display_name: display_name.into(),
        }
    }
}

/// A block of time during which a doctor receives visitors in one room.
///
/// Mirrors the `schedules` table so change-notification snapshots decode into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Persistent id
    pub id: i64,
    /// Room (cabinet) number
    pub room_number: i32,
    /// Doctor receiving in the room
    pub doctor_name: String,
    /// Doctor's specialization
    pub specialization: String,
    /// Start of the session
    pub starts_at: DateTime<Utc>,
    /// End of the session
    pub ends_at: DateTime<Utc>,
}

impl Slot {
    /// Whether `at` falls inside the session.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}
