use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use skybook_core::repository::FlightRepository;
use skybook_core::search::{FlightPage, FlightSearchCriteria};
use skybook_core::{CoreResult, Flight};
use crate::database::db_err;

pub struct PgFlightRepository {
    pool: PgPool,
}

impl PgFlightRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: Uuid,
    airline: String,
    origin: String,
    destination: String,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    price_per_seat: i64,
    total_seats: i32,
    available_seats: i32,
}

impl From<FlightRow> for Flight {
    fn from(row: FlightRow) -> Self {
        Flight {
            id: row.id,
            airline: row.airline,
            origin: row.origin,
            destination: row.destination,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            price_per_seat: row.price_per_seat,
            total_seats: row.total_seats,
            available_seats: row.available_seats,
        }
    }
}

const FLIGHT_COLUMNS: &str =
    "id, airline, origin, destination, departure_time, arrival_time, price_per_seat, total_seats, available_seats";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, criteria: &FlightSearchCriteria) {
    qb.push(" WHERE TRUE");

    if let Some(origin) = &criteria.origin {
        qb.push(" AND LOWER(origin) = LOWER(").push_bind(origin.clone()).push(")");
    }
    if let Some(destination) = &criteria.destination {
        qb.push(" AND LOWER(destination) = LOWER(").push_bind(destination.clone()).push(")");
    }
    if let Some(date) = criteria.date {
        let day_start = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        if let Some(start) = day_start {
            qb.push(" AND departure_time >= ").push_bind(start);
            qb.push(" AND departure_time < ").push_bind(start + Duration::days(1));
        }
    }
}

#[async_trait]
impl FlightRepository for PgFlightRepository {
    async fn get_flight(&self, id: Uuid) -> CoreResult<Option<Flight>> {
        let row = sqlx::query_as::<_, FlightRow>(&format!("SELECT {} FROM flights WHERE id = $1", FLIGHT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(Flight::from))
    }

    async fn search_flights(&self, criteria: &FlightSearchCriteria) -> CoreResult<FlightPage> {
        // Page and count from one snapshot so `total` agrees with the rows.
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM flights");
        push_filters(&mut count_qb, criteria);
        let (total,): (i64,) = count_qb
            .build_query_as()
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut page_qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM flights", FLIGHT_COLUMNS));
        push_filters(&mut page_qb, criteria);
        page_qb
            .push(" ORDER BY departure_time ASC, id ASC LIMIT ")
            .push_bind(i64::from(criteria.limit))
            .push(" OFFSET ")
            .push_bind(criteria.offset() as i64);

        let rows: Vec<FlightRow> = page_qb
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(FlightPage::new(rows.into_iter().map(Flight::from).collect(), total, criteria))
    }
}
