use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use tracing::debug;
use skybook_core::flight::seat_total;
use skybook_core::repository::{BookingRepository, OverdueCursor};
use skybook_core::{Booking, BookingStatus, CoreError, CoreResult, NewBooking, ResolveOutcome, Trigger};
use crate::database::db_err;
use crate::ledger::InventoryLedger;

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    flight_id: Uuid,
    user_email: String,
    num_seats: i32,
    total_price: i64,
    status: String,
    payment_due_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        Ok(Booking {
            id: row.id,
            flight_id: row.flight_id,
            user_email: row.user_email,
            num_seats: row.num_seats,
            total_price: row.total_price,
            status: row.status.parse::<BookingStatus>()?,
            payment_due_at: row.payment_due_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const BOOKING_COLUMNS: &str =
    "id, flight_id, user_email, num_seats, total_price, status, payment_due_at, created_at, updated_at";

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create_booking(&self, draft: NewBooking) -> CoreResult<Booking> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Any early return drops `tx`, which rolls the reservation back.
        let (remaining, price_per_seat) = InventoryLedger::reserve(&mut tx, draft.flight_id, draft.num_seats).await?;
        let total_price = seat_total(price_per_seat, draft.num_seats)?;

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (id, flight_id, user_email, num_seats, total_price, status, payment_due_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(draft.id)
        .bind(draft.flight_id)
        .bind(&draft.user_email)
        .bind(draft.num_seats)
        .bind(total_price)
        .bind(BookingStatus::PendingPayment.as_str())
        .bind(draft.payment_due_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(booking_id = %draft.id, flight_id = %draft.flight_id, remaining, "Seats reserved");
        Booking::try_from(row)
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings(&self, user_email: &str) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE user_email = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn resolve_booking(&self, id: Uuid, trigger: &Trigger) -> CoreResult<ResolveOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock: a concurrent trigger for the same booking waits here and
        // then sees the status this transaction commits.
        let current = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let booking = match current {
            Some(row) => Booking::try_from(row)?,
            None => return Ok(ResolveOutcome::NotFound),
        };

        let transition = match booking.status.on(trigger) {
            Some(t) => t,
            None => return Ok(ResolveOutcome::Ignored(booking)),
        };

        let updated = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(transition.to.as_str())
        .bind(transition.from.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = updated.ok_or_else(|| {
            CoreError::ConsistencyViolation(format!("booking {} changed status while locked", id))
        })?;

        if transition.release_seats {
            InventoryLedger::release(&mut tx, booking.flight_id, booking.num_seats).await?;
        }

        tx.commit().await.map_err(db_err)?;

        Ok(ResolveOutcome::Applied {
            booking: Booking::try_from(row)?,
            transition,
        })
    }

    async fn list_overdue(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<OverdueCursor>,
        limit: u32,
    ) -> CoreResult<Vec<OverdueCursor>> {
        let rows: Vec<(DateTime<Utc>, Uuid)> = sqlx::query_as(
            r#"
            SELECT payment_due_at, id FROM bookings
            WHERE status = $1 AND payment_due_at <= $2
              AND ($3::timestamptz IS NULL OR (payment_due_at, id) > ($3::timestamptz, $4::uuid))
            ORDER BY payment_due_at ASC, id ASC
            LIMIT $5
            "#,
        )
        .bind(BookingStatus::PendingPayment.as_str())
        .bind(cutoff)
        .bind(after.map(|c| c.payment_due_at))
        .bind(after.map(|c| c.booking_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(payment_due_at, booking_id)| OverdueCursor { payment_due_at, booking_id })
            .collect())
    }
}
