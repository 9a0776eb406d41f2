use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use crate::{CoreError, CoreResult};

/// Booking lifecycle. `PendingPayment` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    FailedPayment,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::FailedPayment => "FAILED_PAYMENT",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::PendingPayment)
    }

    /// The single transition function for every trigger.
    ///
    /// Returns `None` when the trigger has no effect from this state. Callers
    /// must evaluate this inside the same atomic unit that writes the result,
    /// otherwise two triggers can both observe `PendingPayment`.
    pub fn on(self, trigger: &Trigger) -> Option<Transition> {
        match (self, trigger) {
            (BookingStatus::PendingPayment, Trigger::PaymentSucceeded) => Some(Transition {
                from: self,
                to: BookingStatus::Confirmed,
                release_seats: false,
            }),
            (BookingStatus::PendingPayment, Trigger::PaymentFailed { .. }) => Some(Transition {
                from: self,
                to: BookingStatus::FailedPayment,
                release_seats: true,
            }),
            (BookingStatus::PendingPayment, Trigger::Expired) => Some(Transition {
                from: self,
                to: BookingStatus::Expired,
                release_seats: true,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(BookingStatus::PendingPayment),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "FAILED_PAYMENT" => Ok(BookingStatus::FailedPayment),
            "EXPIRED" => Ok(BookingStatus::Expired),
            other => Err(CoreError::InternalError(format!("Unknown booking status: {}", other))),
        }
    }
}

/// Something that can resolve a pending booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    PaymentSucceeded,
    PaymentFailed { reason: String },
    Expired,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::PaymentSucceeded => "payment_succeeded",
            Trigger::PaymentFailed { .. } => "payment_failed",
            Trigger::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    /// Compensate by returning the booking's seats, in the same transaction.
    pub release_seats: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub flight_id: Uuid,
    pub user_email: String,
    pub num_seats: i32,
    pub total_price: i64,
    pub status: BookingStatus,
    pub payment_due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the store needs to reserve seats and insert a booking.
/// The price is read from the flight inside the same transaction.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub flight_id: Uuid,
    pub user_email: String,
    pub num_seats: i32,
    pub payment_due_at: DateTime<Utc>,
}

/// What a guarded transition attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    NotFound,
    /// The booking had already left `PendingPayment`; nothing was written.
    Ignored(Booking),
    Applied { booking: Booking, transition: Transition },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub flight_id: Uuid,
    pub user_email: String,
    pub num_seats: i32,
}

impl CreateBookingRequest {
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_seats <= 0 {
            return Err(CoreError::ValidationError(format!(
                "num_seats must be at least 1, got {}",
                self.num_seats
            )));
        }

        let email = self.user_email.trim();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
            None => false,
        };
        if !valid_email {
            return Err(CoreError::ValidationError("user_email must be a valid email address".to_string()));
        }

        Ok(())
    }
}
