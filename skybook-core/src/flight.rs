use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use crate::{CoreError, CoreResult};

/// A sellable flight and its seat counter.
///
/// `available_seats` only moves through [`Flight::reserve`] and
/// [`Flight::release`] (or their SQL equivalents in the store), which keep
/// `0 <= available_seats <= total_seats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub id: Uuid,
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    /// Minor currency units.
    pub price_per_seat: i64,
    pub total_seats: i32,
    pub available_seats: i32,
}

impl Flight {
    /// Take `seats` out of availability, or fail with no side effect.
    pub fn reserve(&mut self, seats: i32) -> CoreResult<i32> {
        if seats <= 0 {
            return Err(CoreError::ValidationError(format!("Seat count must be positive, got {}", seats)));
        }

        if self.available_seats < seats {
            return Err(CoreError::CapacityExceeded {
                requested: seats,
                available: self.available_seats,
            });
        }

        self.available_seats -= seats;
        Ok(self.available_seats)
    }

    /// Return `seats` to availability.
    ///
    /// Going past `total_seats` means the same reservation was released twice,
    /// so it is reported instead of clamped.
    pub fn release(&mut self, seats: i32) -> CoreResult<i32> {
        if seats <= 0 {
            return Err(CoreError::ValidationError(format!("Seat count must be positive, got {}", seats)));
        }

        let restored = self.available_seats.checked_add(seats).unwrap_or(i32::MAX);
        if restored > self.total_seats {
            return Err(CoreError::ConsistencyViolation(format!(
                "releasing {} seats on flight {} would raise availability to {} above capacity {}",
                seats, self.id, restored, self.total_seats
            )));
        }

        self.available_seats = restored;
        Ok(self.available_seats)
    }

    pub fn price_for(&self, seats: i32) -> CoreResult<i64> {
        seat_total(self.price_per_seat, seats)
    }
}

/// Total price in minor units. Overflow is a validation error.
pub fn seat_total(price_per_seat: i64, seats: i32) -> CoreResult<i64> {
    price_per_seat.checked_mul(i64::from(seats)).ok_or_else(|| {
        CoreError::ValidationError(format!("total price of {} seats at {} overflows", seats, price_per_seat))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn flight(total: i32, available: i32) -> Flight {
        let departure = Utc::now() + Duration::days(3);
        Flight {
            id: Uuid::new_v4(),
            airline: "Garuda Indonesia".to_string(),
            origin: "Jakarta".to_string(),
            destination: "Denpasar".to_string(),
            departure_time: departure,
            arrival_time: departure + Duration::hours(2),
            price_per_seat: 100,
            total_seats: total,
            available_seats: available,
        }
    }

    #[test]
    fn test_reserve_and_release_lifecycle() {
        let mut f = flight(180, 180);

        assert_eq!(f.reserve(2).unwrap(), 178);
        assert_eq!(f.release(2).unwrap(), 180);
        assert_eq!(f.price_for(2).unwrap(), 200);
    }

    #[test]
    fn test_reserve_beyond_capacity_has_no_side_effect() {
        let mut f = flight(3, 3);

        match f.reserve(5) {
            Err(CoreError::CapacityExceeded { requested, available }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
        assert_eq!(f.available_seats, 3);
    }

    #[test]
    fn test_double_release_is_a_consistency_violation() {
        let mut f = flight(3, 0);
        f.release(3).unwrap();

        let err = f.release(3).unwrap_err();
        assert!(matches!(err, CoreError::ConsistencyViolation(_)));
        assert_eq!(f.available_seats, 3);
    }

    #[test]
    fn test_price_overflow_is_a_validation_error() {
        let mut f = flight(10, 10);
        f.price_per_seat = i64::MAX / 2;

        assert!(matches!(f.price_for(3), Err(CoreError::ValidationError(_))));
        assert_eq!(seat_total(i64::MAX, 1).unwrap(), i64::MAX);
    }

    #[test]
    fn test_non_positive_quantities_are_rejected() {
        let mut f = flight(10, 10);
        assert!(matches!(f.reserve(0), Err(CoreError::ValidationError(_))));
        assert!(matches!(f.release(-1), Err(CoreError::ValidationError(_))));
        assert_eq!(f.available_seats, 10);
    }
}
