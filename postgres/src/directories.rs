//! Read-only category and schedule lookups.

use crate::rows::{CategoryRow, SlotRow};
use crate::store_error;
use chrono::{DateTime, Utc};
use queuedesk_core::catalog::{Category, Slot};
use queuedesk_core::store::{CategoryDirectory, ScheduleDirectory, StoreFuture};
use queuedesk_core::ticket::TicketId;
use sqlx::PgPool;

/// Categories from the `categories` table.
#[derive(Clone, Debug)]
pub struct PostgresCategoryDirectory {
    pool: PgPool,
}

impl PostgresCategoryDirectory {
    /// Create a directory over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CategoryDirectory for PostgresCategoryDirectory {
    fn resolve<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Category>> {
        Box::pin(async move {
            let row: Option<CategoryRow> =
                sqlx::query_as("SELECT id, letter, display_name FROM categories WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_error("resolve_category"))?;
            Ok(row.map(Category::from))
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Category>> {
        Box::pin(async move {
            let rows: Vec<CategoryRow> =
                sqlx::query_as("SELECT id, letter, display_name FROM categories ORDER BY letter")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(store_error("list_categories"))?;
            Ok(rows.into_iter().map(Category::from).collect())
        })
    }
}

/// Slots and appointments from the `schedules` / `appointments` tables.
#[derive(Clone, Debug)]
pub struct PostgresScheduleDirectory {
    pool: PgPool,
}

impl PostgresScheduleDirectory {
    /// Create a directory over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ScheduleDirectory for PostgresScheduleDirectory {
    fn find_active_slot(
        &self,
        room_number: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Slot>> {
        Box::pin(async move {
            let row: Option<SlotRow> = sqlx::query_as(
                r"
                SELECT id, room_number, doctor_name, specialization, starts_at, ends_at
                FROM schedules
                WHERE room_number = $1 AND starts_at <= $2 AND ends_at > $2
                ORDER BY starts_at DESC, id DESC
                LIMIT 1
                ",
            )
            .bind(room_number)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("find_active_slot"))?;
            Ok(row.map(Slot::from))
        })
    }

    fn find_appointment_time(
        &self,
        ticket_id: TicketId,
    ) -> StoreFuture<'_, Option<DateTime<Utc>>> {
        Box::pin(async move {
            sqlx::query_scalar(
                r"
                SELECT s.starts_at
                FROM appointments a
                JOIN schedules s ON s.id = a.schedule_id
                WHERE a.ticket_id = $1
                ORDER BY s.starts_at
                LIMIT 1
                ",
            )
            .bind(ticket_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("find_appointment_time"))
        })
    }

    fn rooms(&self) -> StoreFuture<'_, Vec<i32>> {
        Box::pin(async move {
            sqlx::query_scalar("SELECT DISTINCT room_number FROM schedules ORDER BY room_number")
                .fetch_all(&self.pool)
                .await
                .map_err(store_error("rooms"))
        })
    }
}
