use sqlx::Postgres;
use uuid::Uuid;
use tracing::error;
use skybook_core::{CoreError, CoreResult};
use crate::database::db_err;

/// Seat reservations as single conditional updates on `flights`.
///
/// Both operations run inside the caller's transaction so the seat count moves
/// together with the booking row. The `WHERE` guard makes each one a single
/// atomic read-modify-write, so concurrent callers serialize on the flight row
/// and can never oversell or over-release.
pub struct InventoryLedger;

#[derive(sqlx::FromRow)]
struct Reserved {
    available_seats: i32,
    price_per_seat: i64,
}

#[derive(sqlx::FromRow)]
struct Counter {
    available_seats: i32,
    total_seats: i32,
}

impl InventoryLedger {
    /// Returns the remaining availability and the price per seat at this instant.
    pub async fn reserve(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        flight_id: Uuid,
        seats: i32,
    ) -> CoreResult<(i32, i64)> {
        if seats <= 0 {
            return Err(CoreError::ValidationError(format!("Seat count must be positive, got {}", seats)));
        }

        let reserved = sqlx::query_as::<_, Reserved>(
            r#"
            UPDATE flights
            SET available_seats = available_seats - $2
            WHERE id = $1 AND available_seats >= $2
            RETURNING available_seats, price_per_seat
            "#,
        )
        .bind(flight_id)
        .bind(seats)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = reserved {
            return Ok((row.available_seats, row.price_per_seat));
        }

        // No row updated: either the flight is missing or it is too full.
        match Self::counter(tx, flight_id).await? {
            None => Err(CoreError::FlightNotFound(flight_id)),
            Some(counter) => Err(CoreError::CapacityExceeded {
                requested: seats,
                available: counter.available_seats,
            }),
        }
    }

    /// Returns the restored availability.
    pub async fn release(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        flight_id: Uuid,
        seats: i32,
    ) -> CoreResult<i32> {
        if seats <= 0 {
            return Err(CoreError::ValidationError(format!("Seat count must be positive, got {}", seats)));
        }

        let restored: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE flights
            SET available_seats = available_seats + $2
            WHERE id = $1 AND available_seats + $2 <= total_seats
            RETURNING available_seats
            "#,
        )
        .bind(flight_id)
        .bind(seats)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some((available,)) = restored {
            return Ok(available);
        }

        match Self::counter(tx, flight_id).await? {
            None => Err(CoreError::FlightNotFound(flight_id)),
            Some(counter) => {
                error!(
                    %flight_id,
                    seats,
                    available = counter.available_seats,
                    total = counter.total_seats,
                    "Release would exceed flight capacity"
                );
                Err(CoreError::ConsistencyViolation(format!(
                    "releasing {} seats on flight {} would exceed capacity ({} of {} available)",
                    seats, flight_id, counter.available_seats, counter.total_seats
                )))
            }
        }
    }

    async fn counter(tx: &mut sqlx::Transaction<'_, Postgres>, flight_id: Uuid) -> CoreResult<Option<Counter>> {
        sqlx::query_as::<_, Counter>("SELECT available_seats, total_seats FROM flights WHERE id = $1")
            .bind(flight_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)
    }
}
