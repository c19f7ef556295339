//! Row types and their mapping to domain types.

use chrono::{DateTime, Utc};
use queuedesk_core::catalog::{Category, Slot};
use queuedesk_core::error::StoreError;
use queuedesk_core::report::DailyReportRow;
use queuedesk_core::store::RoomQueueEntry;
use queuedesk_core::ticket::{ReceptionLog, Ticket, TicketId, TicketNumber, TicketStatus};

/// Ticket columns, qualified with `t.`, in [`TicketRow`] order.
pub(crate) const TICKET_COLUMNS: &str = "t.id, t.letter, t.sequence, t.status, t.category_id, \
     t.window_number, t.created_at, t.called_at, t.started_at, t.completed_at";

pub(crate) const LOG_COLUMNS: &str =
    "id, ticket_id, window_number, called_at, completed_at, duration_ms";

#[derive(sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: i64,
    letter: String,
    sequence: i32,
    status: String,
    category_id: String,
    window_number: Option<i32>,
    created_at: DateTime<Utc>,
    called_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

fn parse_status(status: &str) -> Result<TicketStatus, StoreError> {
    TicketStatus::parse(status)
        .ok_or_else(|| StoreError::CorruptRow(format!("unknown ticket status {status:?}")))
}

fn ticket_number(letter: String, sequence: i32) -> Result<TicketNumber, StoreError> {
    let sequence = u32::try_from(sequence)
        .map_err(|_| StoreError::CorruptRow(format!("negative sequence {sequence}")))?;
    Ok(TicketNumber::new(letter, sequence))
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TicketId::new(row.id),
            number: ticket_number(row.letter, row.sequence)?,
            status: parse_status(&row.status)?,
            category_id: row.category_id,
            window_number: row.window_number,
            created_at: row.created_at,
            called_at: row.called_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

pub(crate) fn tickets(rows: Vec<TicketRow>) -> Result<Vec<Ticket>, StoreError> {
    rows.into_iter().map(Ticket::try_from).collect()
}

#[derive(sqlx::FromRow)]
pub(crate) struct QueueRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    appointment_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for RoomQueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            ticket: Ticket::try_from(row.ticket)?,
            appointment_at: row.appointment_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct LogRow {
    id: i64,
    ticket_id: i64,
    window_number: i32,
    called_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl From<LogRow> for ReceptionLog {
    fn from(row: LogRow) -> Self {
        Self {
            id: row.id,
            ticket_id: TicketId::new(row.ticket_id),
            window_number: row.window_number,
            called_at: row.called_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReportRow {
    ticket_id: i64,
    letter: String,
    sequence: i32,
    status: String,
    appointment_at: Option<DateTime<Utc>>,
    window_number: Option<i32>,
    called_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl TryFrom<ReportRow> for DailyReportRow {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            ticket_id: TicketId::new(row.ticket_id),
            ticket_number: ticket_number(row.letter, row.sequence)?,
            status: parse_status(&row.status)?,
            appointment_at: row.appointment_at,
            window_number: row.window_number,
            called_at: row.called_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CategoryRow {
    id: String,
    letter: String,
    display_name: String,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self::new(row.id, row.letter, row.display_name)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SlotRow {
    id: i64,
    room_number: i32,
    doctor_name: String,
    specialization: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            room_number: row.room_number,
            doctor_name: row.doctor_name,
            specialization: row.specialization,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
        }
    }
}
