//! `PostgreSQL` implementation of [`TicketStore`].
//!
//! Claims select the best Waiting row with `FOR UPDATE OF t SKIP LOCKED`, flip it to
//! Invited and open its reception log in one statement, so concurrent windows never
//! claim the same ticket and never block on each other. Status changes are single
//! conditional updates (`WHERE id = $1 AND status = ANY($n)`).

use crate::rows::{self, LOG_COLUMNS, LogRow, QueueRow, ReportRow, TICKET_COLUMNS, TicketRow};
use crate::store_error;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use queuedesk_core::error::StoreError;
use queuedesk_core::priority::{APPOINTMENT_LOOKAHEAD_MINUTES, day_bounds};
use queuedesk_core::report::DailyReportRow;
use queuedesk_core::store::{
    Claim, Finalized, NewTicket, RoomQueueEntry, StoreFuture, TicketStore, Transition,
};
use queuedesk_core::ticket::{ReceptionLog, Ticket, TicketId, TicketNumber, TicketStatus};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;

/// Tickets ranked by priority.
///
/// Binds: `$1` now, `$2` end of the imminent window, `$3`/`$4` UTC day bounds,
/// `$5` status list, `$6` optional number prefix. Appointments outside the day of
/// `now` are ignored.
fn ranked(select: &str, tail: &str) -> String {
    format!(
        r"
        SELECT {select}
        FROM tickets t
        LEFT JOIN LATERAL (
            SELECT s.starts_at
            FROM appointments a
            JOIN schedules s ON s.id = a.schedule_id
            WHERE a.ticket_id = t.id
              AND s.starts_at >= $3
              AND s.starts_at < $4
            ORDER BY s.starts_at
            LIMIT 1
        ) appt ON true
        WHERE t.status = ANY($5)
          AND ($6::text IS NULL OR t.ticket_number LIKE $6 || '%')
        ORDER BY
            CASE
                WHEN appt.starts_at IS NULL THEN 2
                WHEN appt.starts_at < $1 THEN 0
                WHEN appt.starts_at <= $2 THEN 1
                ELSE 2
            END,
            appt.starts_at ASC NULLS LAST,
            t.created_at,
            t.id
        {tail}
        "
    )
}

/// Bind values shared by every [`ranked`] query.
struct Ranking<'a> {
    now: DateTime<Utc>,
    imminent_until: DateTime<Utc>,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
    statuses: Vec<&'static str>,
    prefix: Option<&'a str>,
}

impl<'a> Ranking<'a> {
    fn new(statuses: &[TicketStatus], prefix: Option<&'a str>, now: DateTime<Utc>) -> Self {
        let (day_start, day_end) = day_bounds(now);
        Self {
            now,
            imminent_until: now + TimeDelta::minutes(APPOINTMENT_LOOKAHEAD_MINUTES),
            day_start,
            day_end,
            statuses: statuses.iter().map(TicketStatus::as_str).collect(),
            prefix,
        }
    }

    fn bind<'q, O>(
        &'q self,
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        query
            .bind(self.now)
            .bind(self.imminent_until)
            .bind(self.day_start)
            .bind(self.day_end)
            .bind(&self.statuses)
            .bind(self.prefix)
    }
}

/// Conditional status update. Binds: `$1` id, `$2` target, `$3` time, `$4` allowed sources.
const TRANSITION_SQL: &str = r"
    UPDATE tickets t
    SET status = $2,
        started_at = CASE WHEN $2 = 'in_progress' THEN COALESCE(t.started_at, $3) ELSE t.started_at END,
        completed_at = CASE WHEN $2 = 'completed' THEN COALESCE(t.completed_at, $3) ELSE t.completed_at END
    WHERE t.id = $1 AND t.status = ANY($4)
";

/// Ticket storage backed by `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_ticket(&self, new: NewTicket) -> Result<Option<Ticket>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("create_ticket"))?;

        // Serializes allocation per letter; released at commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('ticket_number:' || $1))")
            .bind(&new.letter)
            .execute(&mut *tx)
            .await
            .map_err(store_error("create_ticket"))?;

        let last_issued: Option<i32> = sqlx::query_scalar(
            r"
            SELECT sequence FROM tickets
            WHERE letter = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(&new.letter)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error("create_ticket"))?;

        let active_statuses: Vec<&str> =
            TicketStatus::ACTIVE.iter().map(TicketStatus::as_str).collect();
        let active: Vec<i32> =
            sqlx::query_scalar("SELECT sequence FROM tickets WHERE letter = $1 AND status = ANY($2)")
                .bind(&new.letter)
                .bind(&active_statuses)
                .fetch_all(&mut *tx)
                .await
                .map_err(store_error("create_ticket"))?;
        let active: HashSet<i32> = active.into_iter().collect();

        let last_issued = last_issued.and_then(|n| u32::try_from(n).ok());
        let next = new.numbering.next_sequence(last_issued, |n| {
            i32::try_from(n).is_ok_and(|n| active.contains(&n))
        });
        let Some(sequence) = next else {
            debug!(letter = %new.letter, "Every ticket number is held by an active ticket");
            return Ok(None);
        };
        let sequence_col = i32::try_from(sequence)
            .map_err(|_| StoreError::Database(format!("sequence {sequence} out of range")))?;
        let number = TicketNumber::new(new.letter.clone(), sequence);

        let row: TicketRow = sqlx::query_as(&format!(
            r"
            INSERT INTO tickets AS t (letter, sequence, ticket_number, status, category_id, created_at)
            VALUES ($1, $2, $3, 'waiting', $4, $5)
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(&new.letter)
        .bind(sequence_col)
        .bind(number.to_string())
        .bind(&new.category_id)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("create_ticket"))?;

        tx.commit().await.map_err(store_error("create_ticket"))?;
        Ticket::try_from(row).map(Some)
    }

    async fn close_latest_log(
        tx: &mut sqlx::PgConnection,
        id: TicketId,
        at: DateTime<Utc>,
    ) -> Result<Option<ReceptionLog>, StoreError> {
        let row: Option<LogRow> = sqlx::query_as(&format!(
            r"
            UPDATE reception_logs
            SET completed_at = $2,
                duration_ms = FLOOR(EXTRACT(EPOCH FROM ($2 - called_at)) * 1000)::bigint
            WHERE id = (
                SELECT id FROM reception_logs
                WHERE ticket_id = $1 AND completed_at IS NULL
                ORDER BY called_at DESC, id DESC
                LIMIT 1
            )
            RETURNING {LOG_COLUMNS}
            "
        ))
        .bind(id.get())
        .bind(at)
        .fetch_optional(tx)
        .await
        .map_err(store_error("finalize"))?;
        Ok(row.map(ReceptionLog::from))
    }
}

impl TicketStore for PostgresTicketStore {
    fn create_ticket(&self, new: NewTicket) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(self.insert_ticket(new))
    }

    fn get_by_id(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row: Option<TicketRow> =
                sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets t WHERE t.id = $1"))
                    .bind(id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_error("get_by_id"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn next_waiting<'a>(
        &'a self,
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<Ticket>> {
        Box::pin(async move {
            let ranking = Ranking::new(&[TicketStatus::Waiting], prefix, now);
            let sql = ranked(TICKET_COLUMNS, "LIMIT 1");
            let row: Option<TicketRow> = ranking
                .bind(sqlx::query_as(&sql))
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error("next_waiting"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn claim_next<'a>(
        &'a self,
        prefix: Option<&'a str>,
        claim: Claim,
    ) -> StoreFuture<'a, Option<Ticket>> {
        Box::pin(async move {
            let ranking = Ranking::new(&[TicketStatus::Waiting], prefix, claim.at);
            let sql = format!(
                r"
                WITH candidate AS ({candidate}),
                claimed AS (
                    UPDATE tickets t
                    SET status = 'invited', window_number = $7, called_at = $1
                    FROM candidate c
                    WHERE t.id = c.id
                    RETURNING {TICKET_COLUMNS}
                ),
                opened AS (
                    INSERT INTO reception_logs (ticket_id, window_number, called_at)
                    SELECT id, window_number, called_at FROM claimed
                )
                SELECT * FROM claimed
                ",
                candidate = ranked("t.id", "LIMIT 1 FOR UPDATE OF t SKIP LOCKED"),
            );
            let row: Option<TicketRow> = ranking
                .bind(sqlx::query_as(&sql))
                .bind(claim.window_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error("claim_next"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn claim(&self, id: TicketId, claim: Claim) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row: Option<TicketRow> = sqlx::query_as(&format!(
                r"
                WITH claimed AS (
                    UPDATE tickets t
                    SET status = 'invited', window_number = $2, called_at = $3
                    WHERE t.id = $1 AND t.status = 'waiting'
                    RETURNING {TICKET_COLUMNS}
                ),
                opened AS (
                    INSERT INTO reception_logs (ticket_id, window_number, called_at)
                    SELECT id, window_number, called_at FROM claimed
                )
                SELECT * FROM claimed
                "
            ))
            .bind(id.get())
            .bind(claim.window_number)
            .bind(claim.at)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("claim"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn transition(
        &self,
        id: TicketId,
        transition: Transition,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let from: Vec<&str> = transition.from.iter().map(TicketStatus::as_str).collect();
            let row: Option<TicketRow> =
                sqlx::query_as(&format!("{TRANSITION_SQL} RETURNING {TICKET_COLUMNS}"))
                    .bind(id.get())
                    .bind(transition.to.as_str())
                    .bind(transition.at)
                    .bind(&from)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_error("transition"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn finalize(
        &self,
        id: TicketId,
        transition: Transition,
    ) -> StoreFuture<'_, Option<Finalized>> {
        Box::pin(async move {
            let from: Vec<&str> = transition.from.iter().map(TicketStatus::as_str).collect();
            let mut tx = self.pool.begin().await.map_err(store_error("finalize"))?;

            let row: Option<TicketRow> =
                sqlx::query_as(&format!("{TRANSITION_SQL} RETURNING {TICKET_COLUMNS}"))
                    .bind(id.get())
                    .bind(transition.to.as_str())
                    .bind(transition.at)
                    .bind(&from)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(store_error("finalize"))?;
            let Some(row) = row else {
                return Ok(None);
            };

            let closed_log = Self::close_latest_log(&mut tx, id, transition.at).await?;
            tx.commit().await.map_err(store_error("finalize"))?;

            Ok(Some(Finalized {
                ticket: Ticket::try_from(row)?,
                closed_log,
            }))
        })
    }

    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
                .bind(id.get())
                .execute(&self.pool)
                .await
                .map_err(store_error("delete"))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list_by_status<'a>(
        &'a self,
        statuses: &'a [TicketStatus],
        prefix: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            let ranking = Ranking::new(statuses, prefix, now);
            let sql = ranked(TICKET_COLUMNS, "");
            let rows: Vec<TicketRow> = ranking
                .bind(sqlx::query_as(&sql))
                .fetch_all(&self.pool)
                .await
                .map_err(store_error("list_by_status"))?;
            rows::tickets(rows)
        })
    }

    fn find_in_progress_for_room(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let (day_start, day_end) = day_bounds(now);
            let row: Option<TicketRow> = sqlx::query_as(&format!(
                r"
                SELECT {TICKET_COLUMNS}
                FROM tickets t
                JOIN appointments a ON a.ticket_id = t.id
                JOIN schedules s ON s.id = a.schedule_id
                WHERE t.status = 'in_progress'
                  AND s.room_number = $1
                  AND s.starts_at >= $2
                  AND s.starts_at < $3
                ORDER BY t.started_at DESC NULLS LAST, t.id DESC
                LIMIT 1
                "
            ))
            .bind(room_number)
            .bind(day_start)
            .bind(day_end)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("find_in_progress_for_room"))?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn room_queue(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<RoomQueueEntry>> {
        Box::pin(async move {
            let (day_start, day_end) = day_bounds(now);
            let rows: Vec<QueueRow> = sqlx::query_as(&format!(
                r"
                SELECT {TICKET_COLUMNS}, s.starts_at AS appointment_at
                FROM tickets t
                JOIN appointments a ON a.ticket_id = t.id
                JOIN schedules s ON s.id = a.schedule_id
                WHERE t.status IN ('in_progress', 'registered')
                  AND s.room_number = $1
                  AND s.starts_at >= $2
                  AND s.starts_at < $3
                ORDER BY
                    CASE WHEN t.status = 'in_progress' THEN 0 ELSE 1 END,
                    s.starts_at,
                    t.id
                "
            ))
            .bind(room_number)
            .bind(day_start)
            .bind(day_end)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("room_queue"))?;
            rows.into_iter().map(RoomQueueEntry::try_from).collect()
        })
    }

    fn reception_logs(&self, id: TicketId) -> StoreFuture<'_, Vec<ReceptionLog>> {
        Box::pin(async move {
            let rows: Vec<LogRow> = sqlx::query_as(&format!(
                "SELECT {LOG_COLUMNS} FROM reception_logs WHERE ticket_id = $1 ORDER BY called_at, id"
            ))
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("reception_logs"))?;
            Ok(rows.into_iter().map(ReceptionLog::from).collect())
        })
    }

    fn daily_report(&self, day: NaiveDate) -> StoreFuture<'_, Vec<DailyReportRow>> {
        Box::pin(async move {
            let (day_start, day_end) = day_bounds(day.and_time(NaiveTime::MIN).and_utc());
            let rows: Vec<ReportRow> = sqlx::query_as(
                r"
                SELECT t.id AS ticket_id, t.letter, t.sequence, t.status,
                       appt.starts_at AS appointment_at,
                       l.window_number, l.called_at, l.completed_at, l.duration_ms
                FROM tickets t
                LEFT JOIN reception_logs l ON l.ticket_id = t.id
                LEFT JOIN LATERAL (
                    SELECT s.starts_at
                    FROM appointments a
                    JOIN schedules s ON s.id = a.schedule_id
                    WHERE a.ticket_id = t.id
                    ORDER BY s.starts_at
                    LIMIT 1
                ) appt ON true
                WHERE t.created_at >= $1 AND t.created_at < $2
                ORDER BY l.called_at ASC NULLS LAST, t.id, l.id
                ",
            )
            .bind(day_start)
            .bind(day_end)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("daily_report"))?;
            rows.into_iter().map(DailyReportRow::try_from).collect()
        })
    }
}
