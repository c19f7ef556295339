//! Change-notification envelopes.
//!
//! The store emits `{ "action": string, "data": <row snapshot> }` on every mutation.
//! The bridge and broker move the raw payload untouched; observers decode it with
//! [`Envelope::decode`]. An action this build does not know
//! yields [`DecodeError::UnknownAction`], which observers log and drop.

use crate::catalog::Slot;
use crate::ticket::Ticket;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A notification exactly as the store delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Channel the notification arrived on, e.g. `ticket_changed`
    pub channel: String,
    /// Uninterpreted payload
    pub payload: String,
}

impl RawNotification {
    /// Create a raw notification.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Errors decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not an `{action, data}` object
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The action is not one this build understands
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

#[derive(Deserialize)]
struct UntypedEnvelope {
    action: String,
}

/// A decoded change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    /// A ticket was issued
    TicketCreated(Ticket),
    /// A ticket was claimed by a window
    TicketCalled(Ticket),
    /// Service started
    TicketStarted(Ticket),
    /// Service completed
    TicketCompleted(Ticket),
    /// Ticket handed off to another queue stage
    TicketRegistered(Ticket),
    /// Any other ticket update
    TicketUpdated(Ticket),
    /// A ticket was deleted
    TicketDeleted(Ticket),
    /// A schedule slot was added
    ScheduleCreated(Slot),
    /// A schedule slot changed
    ScheduleUpdated(Slot),
    /// A schedule slot was removed
    ScheduleDeleted(Slot),
}

impl Envelope {
    /// Every action string this build decodes.
    pub const ACTIONS: [&'static str; 10] = [
        "ticket_created",
        "ticket_called",
        "ticket_started",
        "ticket_completed",
        "ticket_registered",
        "ticket_updated",
        "ticket_deleted",
        "schedule_created",
        "schedule_updated",
        "schedule_deleted",
    ];

    /// Decode a raw payload.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::UnknownAction`] if the action is not in [`Self::ACTIONS`]
    /// - [`DecodeError::Malformed`] if the payload or its snapshot does not parse
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let untyped: UntypedEnvelope =
            serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if !Self::ACTIONS.contains(&untyped.action.as_str()) {
            return Err(DecodeError::UnknownAction(untyped.action));
        }
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Encode to the wire shape.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot fails to serialize.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Action string of this envelope.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::TicketCreated(_) => "ticket_created",
            Self::TicketCalled(_) => "ticket_called",
            Self::TicketStarted(_) => "ticket_started",
            Self::TicketCompleted(_) => "ticket_completed",
            Self::TicketRegistered(_) => "ticket_registered",
            Self::TicketUpdated(_) => "ticket_updated",
            Self::TicketDeleted(_) => "ticket_deleted",
            Self::ScheduleCreated(_) => "schedule_created",
            Self::ScheduleUpdated(_) => "schedule_updated",
            Self::ScheduleDeleted(_) => "schedule_deleted",
        }
    }

    /// Ticket snapshot, for ticket actions.
    #[must_use]
    pub const fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::TicketCreated(t)
            | Self::TicketCalled(t)
            | Self::TicketStarted(t)
            | Self::TicketCompleted(t)
            | Self::TicketRegistered(t)
            | Self::TicketUpdated(t)
            | Self::TicketDeleted(t) => Some(t),
            Self::ScheduleCreated(_) | Self::ScheduleUpdated(_) | Self::ScheduleDeleted(_) => None,
        }
    }

    /// Slot snapshot, for schedule actions.
    #[must_use]
    pub const fn slot(&self) -> Option<&Slot> {
        match self {
            Self::ScheduleCreated(s) | Self::ScheduleUpdated(s) | Self::ScheduleDeleted(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    /// Whether the envelope describes a ticket change.
    #[must_use]
    pub const fn concerns_tickets(&self) -> bool {
        self.ticket().is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ticket::TicketStatus;

    const CALLED: &str = r#"{"action":"ticket_called","data":{"id":3,"ticket_number":"A003","status":"invited","category_id":"consultation","window_number":2,"created_at":"2025-01-01T09:00:00Z","called_at":"2025-01-01T09:10:00Z","started_at":null,"completed_at":null}}"#;

    #[test]
    fn decodes_ticket_called() {
        let envelope = Envelope::decode(CALLED).unwrap();
        assert_eq!(envelope.action(), "ticket_called");
        let ticket = envelope.ticket().unwrap();
        assert_eq!(ticket.status, TicketStatus::Invited);
        assert_eq!(ticket.window_number, Some(2));
        assert!(envelope.concerns_tickets());
    }

    #[test]
    fn decodes_schedule_snapshot() {
        let payload = r#"{"action":"schedule_updated","data":{"id":9,"room_number":12,"doctor_name":"Dr. Ivanova","specialization":"Therapist","starts_at":"2025-01-01T08:00:00Z","ends_at":"2025-01-01T12:00:00Z"}}"#;
        let envelope = Envelope::decode(payload).unwrap();
        assert_eq!(envelope.slot().unwrap().room_number, 12);
        assert!(!envelope.concerns_tickets());
    }

    #[test]
    fn unknown_action_is_reported_not_fatal() {
        let err = Envelope::decode(r#"{"action":"ticket_teleported","data":{}}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnknownAction("ticket_teleported".to_string()));
    }

    #[test]
    fn malformed_payloads() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"action":"ticket_called","data":{"id":"x"}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn encode_matches_wire_shape() {
        let envelope = Envelope::decode(CALLED).unwrap();
        let value: serde_json::Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["action"], "ticket_called");
        assert_eq!(value["data"]["ticket_number"], "A003");
    }

    #[test]
    fn action_list_matches_variants() {
        let envelope = Envelope::decode(CALLED).unwrap();
        assert!(Envelope::ACTIONS.contains(&envelope.action()));
    }
}
