//! The dispatch service: ticket numbering, priority calls and status transitions.
//!
//! | Operation | From | To | Stamps |
//! |-----------|------|----|--------|
//! | [`call_next`](DispatchService::call_next) / [`call_specific`](DispatchService::call_specific) | Waiting | Invited | `called_at`, `window_number`, opens a reception log |
//! | [`start_appointment`](DispatchService::start_appointment) | Invited | InProgress | `started_at` |
//! | [`complete_appointment`](DispatchService::complete_appointment) | InProgress | Completed | `completed_at`, closes the log |
//! | [`update_status`](DispatchService::update_status)`(Completed)` | Invited, InProgress | Completed | `completed_at`, closes the log |
//! | [`update_status`](DispatchService::update_status)`(Registered)` | Invited | Registered | closes the log |
//!
//! Every write is one conditional store operation. A caller that loses a race sees
//! `InvalidState`, never a double stamp.

use crate::metrics::DispatchMetrics;
use chrono::NaiveDate;
use queuedesk_core::catalog::Category;
use queuedesk_core::environment::Clock;
use queuedesk_core::error::{DispatchError, Result};
use queuedesk_core::numbering::NumberingPolicy;
use queuedesk_core::report::DailyReportRow;
use queuedesk_core::store::{CategoryDirectory, Claim, NewTicket, TicketStore, Transition};
use queuedesk_core::ticket::{Ticket, TicketId, TicketStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatch configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Ticket numbering ceiling
    pub numbering: NumberingPolicy,
}

/// The ticket state machine. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct DispatchService {
    tickets: Arc<dyn TicketStore>,
    categories: Arc<dyn CategoryDirectory>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchService {
    /// Create a service over the given store, category lookup and clock.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        categories: Arc<dyn CategoryDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            categories,
            clock,
            config: DispatchConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Issue a Waiting ticket for `category_id`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] if the category is blank or unknown
    /// - [`DispatchError::NumberingExhausted`] if every number of its letter is active
    /// - [`DispatchError::Store`] if the store fails
    pub async fn create_ticket(&self, category_id: &str) -> Result<Ticket> {
        let category_id = category_id.trim();
        if category_id.is_empty() {
            return Err(DispatchError::Validation("category is required".to_string()));
        }
        let category = self
            .categories
            .resolve(category_id)
            .await?
            .ok_or_else(|| DispatchError::Validation(format!("unknown category: {category_id}")))?;

        let new = NewTicket {
            category_id: category.id,
            letter: category.letter.clone(),
            created_at: self.clock.now(),
            numbering: self.config.numbering,
        };
        let ticket = self
            .tickets
            .create_ticket(new)
            .await?
            .ok_or_else(|| DispatchError::NumberingExhausted {
                letter: category.letter.clone(),
            })?;

        DispatchMetrics::record_created(&category.letter);
        info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.number,
            category = %ticket.category_id,
            "Ticket created"
        );
        Ok(ticket)
    }

    /// Claim the highest-priority Waiting ticket for `window_number`.
    ///
    /// With `category_filter`, only tickets whose number starts with it are eligible.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for a non-positive window or malformed filter
    /// - [`DispatchError::EmptyQueue`] if nobody eligible is waiting
    /// - [`DispatchError::Store`] if the store fails
    pub async fn call_next(&self, window_number: i32, category_filter: Option<&str>) -> Result<Ticket> {
        validate_window(window_number)?;
        let prefix = normalize_prefix(category_filter)?;
        let claim = Claim {
            window_number,
            at: self.clock.now(),
        };

        let Some(ticket) = self.tickets.claim_next(prefix, claim).await? else {
            DispatchMetrics::record_empty_queue();
            debug!(window_number, prefix, "No waiting tickets");
            return Err(DispatchError::EmptyQueue {
                filter: prefix.map(str::to_string),
            });
        };

        DispatchMetrics::record_called("next");
        info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.number,
            window_number,
            "Ticket called"
        );
        Ok(ticket)
    }

    /// Claim one specific Waiting ticket for `window_number`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for a non-positive window
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::InvalidState`] if it is no longer Waiting
    /// - [`DispatchError::Store`] if the store fails
    pub async fn call_specific(&self, id: TicketId, window_number: i32) -> Result<Ticket> {
        validate_window(window_number)?;
        let claim = Claim {
            window_number,
            at: self.clock.now(),
        };

        match self.tickets.claim(id, claim).await? {
            Some(ticket) => {
                DispatchMetrics::record_called("specific");
                info!(
                    ticket_id = %ticket.id,
                    ticket_number = %ticket.number,
                    window_number,
                    "Ticket called out of order"
                );
                Ok(ticket)
            }
            None => Err(self.precondition_failed(id, &[TicketStatus::Waiting]).await),
        }
    }

    /// Start service of an Invited ticket.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::InvalidState`] unless it is Invited
    /// - [`DispatchError::Store`] if the store fails
    pub async fn start_appointment(&self, id: TicketId) -> Result<Ticket> {
        self.advance(id, &[TicketStatus::Invited], TicketStatus::InProgress)
            .await
    }

    /// Complete service of an InProgress ticket and close its reception log.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::InvalidState`] unless it is InProgress
    /// - [`DispatchError::Store`] if the store fails
    pub async fn complete_appointment(&self, id: TicketId) -> Result<Ticket> {
        self.finalize(id, &[TicketStatus::InProgress], TicketStatus::Completed)
            .await
    }

    /// Hand an Invited ticket off to the next queue stage.
    ///
    /// # Errors
    ///
    /// See [`update_status`](Self::update_status).
    pub async fn register(&self, id: TicketId) -> Result<Ticket> {
        self.update_status(id, TicketStatus::Registered).await
    }

    /// Registrar-side status change.
    ///
    /// Waiting and Invited cannot be set directly; use the call operations.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for a target of Waiting or Invited
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::InvalidState`] if the current status does not allow it
    /// - [`DispatchError::Store`] if the store fails
    pub async fn update_status(&self, id: TicketId, status: TicketStatus) -> Result<Ticket> {
        match status {
            TicketStatus::InProgress => self.start_appointment(id).await,
            TicketStatus::Completed => {
                self.finalize(
                    id,
                    &[TicketStatus::Invited, TicketStatus::InProgress],
                    TicketStatus::Completed,
                )
                .await
            }
            TicketStatus::Registered => {
                self.finalize(id, &[TicketStatus::Invited], TicketStatus::Registered)
                    .await
            }
            TicketStatus::Waiting | TicketStatus::Invited => Err(DispatchError::Validation(
                format!("status {status} can only be reached by calling a ticket"),
            )),
        }
    }

    /// Hard-delete a ticket.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::Store`] if the store fails
    pub async fn delete_ticket(&self, id: TicketId) -> Result<()> {
        if !self.tickets.delete(id).await? {
            return Err(DispatchError::NotFound(id));
        }
        info!(ticket_id = %id, "Ticket deleted");
        Ok(())
    }

    /// Fetch one ticket.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] if the ticket does not exist
    /// - [`DispatchError::Store`] if the store fails
    pub async fn get_ticket(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get_by_id(id)
            .await?
            .ok_or(DispatchError::NotFound(id))
    }

    /// The ticket [`call_next`](Self::call_next) would claim right now, without claiming it.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for a malformed filter
    /// - [`DispatchError::Store`] if the store fails
    pub async fn peek_next(&self, category_filter: Option<&str>) -> Result<Option<Ticket>> {
        let prefix = normalize_prefix(category_filter)?;
        Ok(self.tickets.next_waiting(prefix, self.clock.now()).await?)
    }

    /// Waiting and Invited tickets in priority order, for the waiting-room board.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Validation`] for a malformed filter
    /// - [`DispatchError::Store`] if the store fails
    pub async fn active_tickets(&self, category_filter: Option<&str>) -> Result<Vec<Ticket>> {
        let prefix = normalize_prefix(category_filter)?;
        Ok(self
            .tickets
            .list_by_status(&TicketStatus::ON_BOARD, prefix, self.clock.now())
            .await?)
    }

    /// One row per reception log for tickets created on `day`, plus uncalled tickets.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Store`] if the store fails.
    pub async fn get_daily_report(&self, day: NaiveDate) -> Result<Vec<DailyReportRow>> {
        Ok(self.tickets.daily_report(day).await?)
    }

    /// Service menu for the ticket kiosk.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Store`] if the lookup fails.
    pub async fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.categories.list().await?)
    }

    async fn advance(&self, id: TicketId, from: &[TicketStatus], to: TicketStatus) -> Result<Ticket> {
        let transition = Transition {
            from: from.to_vec(),
            to,
            at: self.clock.now(),
        };
        match self.tickets.transition(id, transition).await? {
            Some(ticket) => {
                DispatchMetrics::record_transition(to.as_str());
                info!(ticket_id = %id, ticket_number = %ticket.number, status = %to, "Ticket status changed");
                Ok(ticket)
            }
            None => Err(self.precondition_failed(id, from).await),
        }
    }

    async fn finalize(&self, id: TicketId, from: &[TicketStatus], to: TicketStatus) -> Result<Ticket> {
        let transition = Transition {
            from: from.to_vec(),
            to,
            at: self.clock.now(),
        };
        let Some(finalized) = self.tickets.finalize(id, transition).await? else {
            return Err(self.precondition_failed(id, from).await);
        };

        DispatchMetrics::record_transition(to.as_str());
        match &finalized.closed_log {
            Some(log) => {
                if let Some(duration) = log.duration().and_then(|d| d.to_std().ok()) {
                    DispatchMetrics::record_service_duration(duration);
                }
                info!(
                    ticket_id = %id,
                    ticket_number = %finalized.ticket.number,
                    status = %to,
                    duration_ms = log.duration_ms,
                    "Ticket finalized"
                );
            }
            None => {
                DispatchMetrics::record_integrity_warning();
                warn!(
                    ticket_id = %id,
                    ticket_number = %finalized.ticket.number,
                    status = %to,
                    "Finalized ticket had no open reception log"
                );
            }
        }
        Ok(finalized.ticket)
    }

    /// Explain why a conditional write matched nothing.
    async fn precondition_failed(&self, id: TicketId, expected: &[TicketStatus]) -> DispatchError {
        match self.tickets.get_by_id(id).await {
            Ok(Some(ticket)) => DispatchError::InvalidState {
                ticket_id: id,
                actual: ticket.status,
                expected: expected.to_vec(),
            },
            Ok(None) => DispatchError::NotFound(id),
            Err(e) => e.into(),
        }
    }
}

fn validate_window(window_number: i32) -> Result<()> {
    if window_number > 0 {
        Ok(())
    } else {
        Err(DispatchError::Validation(format!(
            "window number must be positive, got {window_number}"
        )))
    }
}

fn normalize_prefix(filter: Option<&str>) -> Result<Option<&str>> {
    queuedesk_core::ticket::normalize_prefix(filter)
        .map_err(|e| DispatchError::Validation(e.to_string()))
}
