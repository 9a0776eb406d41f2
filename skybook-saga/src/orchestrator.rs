use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use skybook_core::bus::{topics, EventBus};
use skybook_core::repository::{BookingRepository, FlightRepository};
use skybook_core::search::{FlightPage, FlightSearchCriteria, FlightSearchRequest};
use skybook_core::{
    Booking, BookingStatus, CoreError, CoreResult, CreateBookingRequest, Flight, NewBooking, ResolveOutcome, Trigger,
};
use skybook_shared::models::events::{NotificationKind, PaymentOutcomeMessage, PaymentResult};
use skybook_shared::pii::Masked;
use crate::dispatch::{self, Dispatcher};
use crate::metrics::SagaMetrics;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingCreated {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub payment_due_timestamp: DateTime<Utc>,
    pub total_price: i64,
}

/// A booking as read back by its payer, with the flight it holds seats on.
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetails {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub flight_id: Uuid,
    pub user_email: String,
    pub num_seats: i32,
    pub total_price: i64,
    pub payment_due_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub flight: Option<Flight>,
}

impl BookingDetails {
    fn new(booking: Booking, flight: Option<Flight>) -> Self {
        Self {
            booking_id: booking.id,
            status: booking.status,
            flight_id: booking.flight_id,
            user_email: booking.user_email,
            num_seats: booking.num_seats,
            total_price: booking.total_price,
            payment_due_timestamp: booking.payment_due_at,
            created_at: booking.created_at,
            flight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    UnknownBooking,
    AlreadyResolved(BookingStatus),
    /// An expiry delivered while the payment window is still open.
    NotYetDue,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::UnknownBooking => "unknown_booking",
            DiscardReason::AlreadyResolved(_) => "already_resolved",
            DiscardReason::NotYetDue => "not_yet_due",
        }
    }
}

/// What an inbound trigger did to its booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    Applied(BookingStatus),
    Discarded(DiscardReason),
}

/// Coordinates a booking from reservation to its terminal status.
///
/// Holds no locks of its own: every check-then-write goes through a single
/// repository call, so any number of these can run against the same store.
pub struct BookingSaga {
    flights: Arc<dyn FlightRepository>,
    bookings: Arc<dyn BookingRepository>,
    dispatcher: Dispatcher,
    payment_window: Duration,
    metrics: SagaMetrics,
}

impl BookingSaga {
    pub fn new(
        flights: Arc<dyn FlightRepository>,
        bookings: Arc<dyn BookingRepository>,
        bus: Arc<dyn EventBus>,
        payment_window: Duration,
        metrics: SagaMetrics,
    ) -> Self {
        Self {
            flights,
            bookings,
            dispatcher: Dispatcher::new(bus),
            payment_window,
            metrics,
        }
    }

    pub fn metrics(&self) -> &SagaMetrics {
        &self.metrics
    }

    pub async fn create_booking(&self, req: CreateBookingRequest) -> CoreResult<BookingCreated> {
        let result = self.reserve(req).await;
        if let Err(e) = &result {
            self.metrics.booking_rejected(e.code());
        }
        let booking = result?;

        // The booking is committed from here on; nothing below may fail the call.
        let delay = (booking.payment_due_at - Utc::now()).to_std().unwrap_or_default();
        if let Err(e) = self.dispatcher.schedule_expiry(&booking, delay).await {
            // The overdue reconciler expires it instead.
            warn!(booking_id = %booking.id, error = %e, "Failed to schedule expiry");
            self.metrics.publish_failed(topics::BOOKING_EXPIRED);
        }

        let dispatcher = self.dispatcher.clone();
        let metrics = self.metrics.clone();
        let pending = booking.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.request_payment(&pending).await {
                warn!(booking_id = %pending.id, error = %e, "Payment request not published");
                metrics.publish_failed(topics::PAYMENT_REQUEST);
            }
            let details = dispatch::pending_details(&pending);
            if let Err(e) = dispatcher.notify(NotificationKind::Pending, &pending, details).await {
                warn!(booking_id = %pending.id, error = %e, "Pending notification not published");
                metrics.publish_failed(topics::NOTIFICATION_PENDING);
            }
        });

        Ok(BookingCreated {
            booking_id: booking.id,
            status: booking.status,
            payment_due_timestamp: booking.payment_due_at,
            total_price: booking.total_price,
        })
    }

    async fn reserve(&self, req: CreateBookingRequest) -> CoreResult<Booking> {
        req.validate()?;

        let draft = NewBooking {
            id: Uuid::new_v4(),
            flight_id: req.flight_id,
            user_email: req.user_email.trim().to_string(),
            num_seats: req.num_seats,
            payment_due_at: Utc::now() + self.payment_window,
        };

        match self.bookings.create_booking(draft).await {
            Ok(booking) => {
                self.metrics.booking_created();
                info!(
                    booking_id = %booking.id,
                    flight_id = %booking.flight_id,
                    payer = %Masked(&booking.user_email),
                    seats = booking.num_seats,
                    total_price = booking.total_price,
                    "Booking created"
                );
                Ok(booking)
            }
            Err(e @ CoreError::CapacityExceeded { .. }) => {
                info!(flight_id = %req.flight_id, seats = req.num_seats, "Booking rejected: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn handle_payment_outcome(&self, msg: &PaymentOutcomeMessage) -> CoreResult<SagaOutcome> {
        let trigger = match msg.payment_status {
            PaymentResult::Success => Trigger::PaymentSucceeded,
            PaymentResult::Failure => Trigger::PaymentFailed { reason: msg.failure_reason() },
        };
        self.apply(msg.booking_id, trigger).await
    }

    /// Expire a booking whose payment window has closed. An early expiry is
    /// discarded and scheduled again for the rest of the window, so a payment
    /// confirmed inside the window always wins.
    pub async fn handle_expiry(&self, booking_id: Uuid) -> CoreResult<SagaOutcome> {
        if let Some(booking) = self.bookings.get_booking(booking_id).await? {
            let now = Utc::now();
            if booking.status == BookingStatus::PendingPayment && now < booking.payment_due_at {
                let remaining = (booking.payment_due_at - now).to_std().unwrap_or_default();
                warn!(
                    %booking_id,
                    due_at = %booking.payment_due_at,
                    remaining_ms = remaining.as_millis() as u64,
                    "Expiry arrived before the payment deadline, rescheduling"
                );
                // A failed reschedule surfaces as retryable so the message is not acked.
                self.dispatcher.schedule_expiry(&booking, remaining).await?;
                return Ok(self.discard(DiscardReason::NotYetDue));
            }
        }
        self.apply(booking_id, Trigger::Expired).await
    }

    async fn apply(&self, booking_id: Uuid, trigger: Trigger) -> CoreResult<SagaOutcome> {
        let outcome = match self.bookings.resolve_booking(booking_id, &trigger).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, CoreError::ConsistencyViolation(_)) {
                    self.metrics.consistency_violation();
                    error!(%booking_id, trigger = trigger.name(), error = %e, "Consistency violation while resolving booking");
                }
                return Err(e);
            }
        };

        match outcome {
            ResolveOutcome::NotFound => {
                info!(%booking_id, trigger = trigger.name(), "Discarding message for unknown booking");
                Ok(self.discard(DiscardReason::UnknownBooking))
            }
            ResolveOutcome::Ignored(booking) => {
                debug!(%booking_id, trigger = trigger.name(), status = %booking.status, "Booking already resolved, ignoring");
                Ok(self.discard(DiscardReason::AlreadyResolved(booking.status)))
            }
            ResolveOutcome::Applied { booking, transition } => {
                self.metrics.transition_applied(transition.to.as_str());
                info!(
                    %booking_id,
                    from = %transition.from,
                    to = %transition.to,
                    seats_released = transition.release_seats,
                    "Booking transitioned"
                );
                self.announce(&booking, &trigger).await;
                Ok(SagaOutcome::Applied(transition.to))
            }
        }
    }

    fn discard(&self, reason: DiscardReason) -> SagaOutcome {
        self.metrics.message_discarded(reason.as_str());
        SagaOutcome::Discarded(reason)
    }

    /// Tell the payer. The transition already committed, so a lost
    /// notification is only logged and counted.
    async fn announce(&self, booking: &Booking, trigger: &Trigger) {
        let (kind, details) = match (booking.status, trigger) {
            (BookingStatus::Confirmed, _) => (NotificationKind::Confirmed, dispatch::CONFIRMED_DETAILS.to_string()),
            (BookingStatus::FailedPayment, Trigger::PaymentFailed { reason }) => {
                (NotificationKind::Failed, dispatch::failed_details(reason))
            }
            (BookingStatus::Expired, _) => (NotificationKind::Expired, dispatch::EXPIRED_DETAILS.to_string()),
            (status, _) => {
                warn!(booking_id = %booking.id, %status, trigger = trigger.name(), "No notification for transition");
                return;
            }
        };

        if let Err(e) = self.dispatcher.notify(kind, booking, details).await {
            let topic = dispatch::notification_topic(kind);
            warn!(booking_id = %booking.id, topic, error = %e, "Notification not published");
            self.metrics.publish_failed(topic);
        }
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> CoreResult<BookingDetails> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(CoreError::BookingNotFound(booking_id))?;
        let flight = self.flights.get_flight(booking.flight_id).await?;

        Ok(BookingDetails::new(booking, flight))
    }

    /// Newest first.
    pub async fn list_bookings(&self, user_email: &str) -> CoreResult<Vec<BookingDetails>> {
        let bookings = self.bookings.list_bookings(user_email.trim()).await?;

        let mut flights: HashMap<Uuid, Option<Flight>> = HashMap::new();
        let mut details = Vec::with_capacity(bookings.len());
        for booking in bookings {
            if !flights.contains_key(&booking.flight_id) {
                let flight = self.flights.get_flight(booking.flight_id).await?;
                flights.insert(booking.flight_id, flight);
            }
            let flight = flights.get(&booking.flight_id).cloned().flatten();
            details.push(BookingDetails::new(booking, flight));
        }

        Ok(details)
    }

    pub async fn search_flights(&self, req: FlightSearchRequest) -> CoreResult<FlightPage> {
        let criteria = FlightSearchCriteria::try_from(req)?;
        self.flights.search_flights(&criteria).await
    }
}
