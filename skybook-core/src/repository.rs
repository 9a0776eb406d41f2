use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::booking::{Booking, NewBooking, ResolveOutcome, Trigger};
use crate::flight::Flight;
use crate::search::{FlightPage, FlightSearchCriteria};
use crate::CoreResult;

/// Repository trait for flight data access
#[async_trait]
pub trait FlightRepository: Send + Sync {
    async fn get_flight(&self, id: Uuid) -> CoreResult<Option<Flight>>;

    async fn search_flights(&self, criteria: &FlightSearchCriteria) -> CoreResult<FlightPage>;
}

/// Repository trait for booking records.
///
/// Every write here spans the booking row and the flight's seat counter in a
/// single atomic unit.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Reserve `num_seats` on the flight and insert the booking as
    /// `PENDING_PAYMENT`. Both happen or neither does.
    async fn create_booking(&self, draft: NewBooking) -> CoreResult<Booking>;

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    /// Newest first.
    async fn list_bookings(&self, user_email: &str) -> CoreResult<Vec<Booking>>;

    /// Check the booking's status and apply `trigger` under the same lock,
    /// releasing seats in the same transaction when the transition asks for it.
    async fn resolve_booking(&self, id: Uuid, trigger: &Trigger) -> CoreResult<ResolveOutcome>;

    /// Pending bookings whose deadline is at or before `cutoff`, ordered by
    /// `(payment_due_at, id)` and starting strictly after `after`.
    async fn list_overdue(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<OverdueCursor>,
        limit: u32,
    ) -> CoreResult<Vec<OverdueCursor>>;
}

/// Keyset position in the overdue scan. Orders by deadline, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OverdueCursor {
    pub payment_due_at: DateTime<Utc>,
    pub booking_id: Uuid,
}
