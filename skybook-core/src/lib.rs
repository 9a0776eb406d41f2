pub mod booking;
pub mod bus;
pub mod flight;
pub mod repository;
pub mod search;

pub use booking::{Booking, BookingStatus, CreateBookingRequest, NewBooking, ResolveOutcome, Transition, Trigger};
pub use flight::Flight;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not enough seats available. Requested: {requested}, Available: {available}")]
    CapacityExceeded { requested: i32, available: i32 },
    #[error("Flight with ID {0} not found")]
    FlightNotFound(Uuid),
    #[error("Booking with ID {0} not found")]
    BookingNotFound(Uuid),
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Event bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Transport failures are the only errors worth another attempt; everything
    /// else fails the same way on every delivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable(_) | CoreError::BusUnavailable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError(_) => "VALIDATION_ERROR",
            CoreError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            CoreError::FlightNotFound(_) => "FLIGHT_NOT_FOUND",
            CoreError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            CoreError::ConsistencyViolation(_) => "CONSISTENCY_VIOLATION",
            CoreError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            CoreError::BusUnavailable(_) => "BUS_UNAVAILABLE",
            CoreError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
