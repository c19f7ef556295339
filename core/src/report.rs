//! Daily service report rows.

use crate::ticket::{TicketId, TicketNumber, TicketStatus};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One line of the daily report: a reception log joined with its ticket.
///
/// Tickets that were never called appear once with the call columns empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReportRow {
    /// Ticket id
    pub ticket_id: TicketId,
    /// Ticket number
    pub ticket_number: TicketNumber,
    /// Ticket status at report time
    pub status: TicketStatus,
    /// Appointment time, when the ticket had one
    pub appointment_at: Option<DateTime<Utc>>,
    /// Window the call went to
    pub window_number: Option<i32>,
    /// Call time
    pub called_at: Option<DateTime<Utc>>,
    /// Finalization time of this call
    pub completed_at: Option<DateTime<Utc>>,
    /// Service duration in milliseconds
    pub duration_ms: Option<i64>,
}

impl DailyReportRow {
    /// Service duration of this call, once closed.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.duration_ms.map(TimeDelta::milliseconds)
    }
}
