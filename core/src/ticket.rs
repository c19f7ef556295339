//! Tickets, their status machine and human-facing numbers.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persistent numeric ticket identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(i64);

impl TicketId {
    /// Wrap a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ticket status.
///
/// ```text
/// Waiting ──call──► Invited ──start──► InProgress ──complete──► Completed
///                      │
///                      └──register──► Registered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// In the queue, not yet called
    Waiting,
    /// Called to a window, visitor on the way
    Invited,
    /// Being served
    InProgress,
    /// Served
    Completed,
    /// Handed off to a different queue stage
    Registered,
}

impl TicketStatus {
    /// Statuses that hold a ticket number in the active numbering window.
    pub const ACTIVE: [Self; 3] = [Self::Waiting, Self::Invited, Self::InProgress];

    /// Statuses shown on the waiting-room board.
    pub const ON_BOARD: [Self; 2] = [Self::Waiting, Self::Invited];

    /// Convert to the database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Invited => "invited",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Registered => "registered",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "invited" => Some(Self::Invited),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "registered" => Some(Self::Registered),
            _ => None,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`TicketNumber`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ticket number: {0:?}")]
pub struct InvalidTicketNumber(pub String);

/// Longest accepted category prefix filter.
pub const MAX_PREFIX_LEN: usize = 8;

/// A category filter that is neither blank nor a short alphanumeric prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid category filter: {0:?}")]
pub struct InvalidPrefix(pub String);

/// Normalize a category filter for [`TicketNumber::matches_prefix`] and store queries.
///
/// Blank filters mean "any category". Anything else must be at most
/// [`MAX_PREFIX_LEN`] ASCII alphanumerics, so it can never carry `LIKE` wildcards.
///
/// # Errors
///
/// Returns [`InvalidPrefix`] for any other filter.
pub fn normalize_prefix(filter: Option<&str>) -> Result<Option<&str>, InvalidPrefix> {
    let Some(prefix) = filter.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if prefix.len() > MAX_PREFIX_LEN || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(InvalidPrefix(prefix.to_string()));
    }
    Ok(Some(prefix))
}

/// Human-facing ticket number: category letter plus zero-padded sequence, e.g. `A007`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketNumber {
    letter: String,
    sequence: u32,
}

impl TicketNumber {
    /// Build a number from a category letter and sequence.
    #[must_use]
    pub fn new(letter: impl Into<String>, sequence: u32) -> Self {
        Self {
            letter: letter.into(),
            sequence,
        }
    }

    /// Category letter prefix.
    #[must_use]
    pub fn letter(&self) -> &str {
        &self.letter
    }

    /// Sequence within the letter.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Whether the rendered number starts with `prefix`.
    #[must_use]
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.letter, self.sequence)
    }
}

impl FromStr for TicketNumber {
    type Err = InvalidTicketNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| InvalidTicketNumber(s.to_string()))?;
        let (letter, digits) = s.split_at(split);
        if letter.is_empty() || !letter.chars().all(char::is_alphabetic) {
            return Err(InvalidTicketNumber(s.to_string()));
        }
        let sequence = digits
            .parse()
            .map_err(|_| InvalidTicketNumber(s.to_string()))?;
        Ok(Self::new(letter, sequence))
    }
}

impl TryFrom<String> for TicketNumber {
    type Error = InvalidTicketNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TicketNumber> for String {
    fn from(value: TicketNumber) -> Self {
        value.to_string()
    }
}

/// The unit of service.
///
/// Field names mirror the `tickets` table so that a `row_to_json` snapshot carried
/// in a change notification deserializes straight into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Persistent id
    pub id: TicketId,
    /// Human-facing number
    #[serde(rename = "ticket_number")]
    pub number: TicketNumber,
    /// Current status
    pub status: TicketStatus,
    /// Service category the visitor selected
    pub category_id: String,
    /// Window or room the ticket was called to
    pub window_number: Option<i32>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set when the ticket is claimed
    pub called_at: Option<DateTime<Utc>>,
    /// Set when service starts
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the ticket is completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row per call, used to measure service latency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionLog {
    /// Persistent id
    pub id: i64,
    /// Ticket that was called
    pub ticket_id: TicketId,
    /// Window or room the ticket was called to
    pub window_number: i32,
    /// Call time
    pub called_at: DateTime<Utc>,
    /// Set when the ticket is finalized
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - called_at` in milliseconds
    pub duration_ms: Option<i64>,
}

impl ReceptionLog {
    /// Whether the log is still waiting for its ticket to be finalized.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Service duration, once closed.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.duration_ms.map(TimeDelta::milliseconds)
    }

    /// Close the log at `at`, computing the duration from the call time.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.duration_ms = Some((at - self.called_at).num_milliseconds());
    }
}
