use std::sync::Arc;
use std::time::Duration as StdDuration;
use chrono::{Duration, Utc};
use uuid::Uuid;
use skybook_core::bus::{topics, MessageHandler};
use skybook_core::search::FlightSearchRequest;
use skybook_core::{BookingStatus, CoreError, CreateBookingRequest, Flight};
use skybook_saga::{
    BookingSaga, DiscardReason, ExpiryHandler, OverdueReconciler, PaymentOutcomeHandler, SagaMetrics, SagaOutcome,
};
use skybook_shared::models::events::{PaymentOutcomeMessage, PaymentResult};
use skybook_store::{InMemoryBus, InMemoryStore};

struct Harness {
    store: Arc<InMemoryStore>,
    bus: Arc<InMemoryBus>,
    saga: Arc<BookingSaga>,
}

impl Harness {
    fn new() -> Self {
        Self::with_window(Duration::minutes(15))
    }

    fn with_window(window: Duration) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let saga = Arc::new(BookingSaga::new(
            store.clone(),
            store.clone(),
            bus.clone(),
            window,
            SagaMetrics::new().unwrap(),
        ));
        Self { store, bus, saga }
    }

    fn add_flight(&self, total: i32, available: i32, price: i64) -> Uuid {
        let departure = Utc::now() + Duration::days(7);
        let flight = Flight {
            id: Uuid::new_v4(),
            airline: "SkyAir".to_string(),
            origin: "JFK".to_string(),
            destination: "LAX".to_string(),
            departure_time: departure,
            arrival_time: departure + Duration::hours(6),
            price_per_seat: price,
            total_seats: total,
            available_seats: available,
        };
        let id = flight.id;
        self.store.insert_flight(flight);
        id
    }

    fn available(&self, flight_id: Uuid) -> i32 {
        self.store.flight(flight_id).unwrap().available_seats
    }

    async fn book(&self, flight_id: Uuid, seats: i32) -> Uuid {
        self.saga
            .create_booking(CreateBookingRequest {
                flight_id,
                user_email: "traveler@example.com".to_string(),
                num_seats: seats,
            })
            .await
            .unwrap()
            .booking_id
    }

    async fn status(&self, booking_id: Uuid) -> BookingStatus {
        self.saga.get_booking(booking_id).await.unwrap().status
    }
}

fn payment(booking_id: Uuid, result: PaymentResult) -> PaymentOutcomeMessage {
    PaymentOutcomeMessage {
        booking_id,
        payment_status: result,
        reason: None,
        payment_timestamp: None,
    }
}

#[tokio::test]
async fn test_end_to_end_confirmed_booking() {
    let h = Harness::new();
    let flight_id = h.add_flight(180, 180, 100);

    let created = h
        .saga
        .create_booking(CreateBookingRequest {
            flight_id,
            user_email: "traveler@example.com".to_string(),
            num_seats: 2,
        })
        .await
        .unwrap();
    assert_eq!(created.status, BookingStatus::PendingPayment);
    assert_eq!(created.total_price, 200);
    assert_eq!(h.available(flight_id), 178);

    let outcome = h.saga.handle_payment_outcome(&payment(created.booking_id, PaymentResult::Success)).await.unwrap();
    assert_eq!(outcome, SagaOutcome::Applied(BookingStatus::Confirmed));
    assert_eq!(h.available(flight_id), 178);

    let outcome = h.saga.handle_expiry(created.booking_id).await.unwrap();
    assert_eq!(outcome, SagaOutcome::Discarded(DiscardReason::AlreadyResolved(BookingStatus::Confirmed)));
    assert_eq!(h.status(created.booking_id).await, BookingStatus::Confirmed);
    assert_eq!(h.available(flight_id), 178);
}

#[tokio::test]
async fn test_capacity_rejection_leaves_availability() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 3, 100);

    let err = h
        .saga
        .create_booking(CreateBookingRequest {
            flight_id,
            user_email: "traveler@example.com".to_string(),
            num_seats: 5,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::CapacityExceeded { requested: 5, available: 3 }));
    assert_eq!(h.available(flight_id), 3);
    assert!(h.bus.scheduled().is_empty());

    let text = h.saga.metrics().render().unwrap();
    assert!(text.contains(r#"skybook_booking_rejections_total{reason="CAPACITY_EXCEEDED"} 1"#));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_before_reserving() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 10, 100);

    let zero = CreateBookingRequest { flight_id, user_email: "a@example.com".to_string(), num_seats: 0 };
    assert!(matches!(h.saga.create_booking(zero).await, Err(CoreError::ValidationError(_))));

    let unknown = Uuid::new_v4();
    let missing = CreateBookingRequest { flight_id: unknown, user_email: "a@example.com".to_string(), num_seats: 1 };
    assert!(matches!(h.saga.create_booking(missing).await, Err(CoreError::FlightNotFound(id)) if id == unknown));

    assert_eq!(h.available(flight_id), 10);
}

#[tokio::test]
async fn test_payment_failure_compensates() {
    let h = Harness::new();
    let flight_id = h.add_flight(3, 3, 100);
    let booking_id = h.book(flight_id, 3).await;
    assert_eq!(h.available(flight_id), 0);

    let mut msg = payment(booking_id, PaymentResult::Failure);
    msg.reason = Some("Card declined".to_string());
    let outcome = h.saga.handle_payment_outcome(&msg).await.unwrap();

    assert_eq!(outcome, SagaOutcome::Applied(BookingStatus::FailedPayment));
    assert_eq!(h.available(flight_id), 3);

    let failed = h.bus.published_on(topics::NOTIFICATION_FAILED);
    assert_eq!(failed.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&failed[0].payload).unwrap();
    assert_eq!(body["details"], "Payment failed: Card declined");
    assert_eq!(body["type"], "BOOKING_PAYMENT_FAILED");
}

#[tokio::test]
async fn test_duplicate_failures_release_once() {
    let h = Harness::new();
    let flight_id = h.add_flight(5, 5, 100);
    let booking_id = h.book(flight_id, 2).await;

    let msg = payment(booking_id, PaymentResult::Failure);
    h.saga.handle_payment_outcome(&msg).await.unwrap();
    let second = h.saga.handle_payment_outcome(&msg).await.unwrap();

    assert!(matches!(second, SagaOutcome::Discarded(DiscardReason::AlreadyResolved(BookingStatus::FailedPayment))));
    assert_eq!(h.available(flight_id), 5);
    assert_eq!(h.bus.published_on(topics::NOTIFICATION_FAILED).len(), 1);
}

#[tokio::test]
async fn test_expiry_only_path_expires_once() {
    let h = Harness::with_window(Duration::zero());
    let flight_id = h.add_flight(4, 4, 100);
    let booking_id = h.book(flight_id, 4).await;

    assert_eq!(h.saga.handle_expiry(booking_id).await.unwrap(), SagaOutcome::Applied(BookingStatus::Expired));
    assert_eq!(h.available(flight_id), 4);

    assert!(matches!(h.saga.handle_expiry(booking_id).await.unwrap(), SagaOutcome::Discarded(_)));
    assert_eq!(h.available(flight_id), 4);
    assert_eq!(h.bus.published_on(topics::NOTIFICATION_EXPIRED).len(), 1);
}

#[tokio::test]
async fn test_success_wins_over_expiry_in_either_order() {
    for expiry_first in [false, true] {
        let h = Harness::new();
        let flight_id = h.add_flight(2, 2, 100);
        let booking_id = h.book(flight_id, 2).await;

        if expiry_first {
            let early = h.saga.handle_expiry(booking_id).await.unwrap();
            assert_eq!(early, SagaOutcome::Discarded(DiscardReason::NotYetDue));
            h.saga.handle_payment_outcome(&payment(booking_id, PaymentResult::Success)).await.unwrap();
            let due = h.saga.handle_expiry(booking_id).await.unwrap();
            assert_eq!(due, SagaOutcome::Discarded(DiscardReason::AlreadyResolved(BookingStatus::Confirmed)));
        } else {
            h.saga.handle_payment_outcome(&payment(booking_id, PaymentResult::Success)).await.unwrap();
            h.saga.handle_expiry(booking_id).await.unwrap();
        }

        assert_eq!(h.status(booking_id).await, BookingStatus::Confirmed);
        assert_eq!(h.available(flight_id), 0);
    }
}

#[tokio::test]
async fn test_payment_after_deadline_loses_to_expiry() {
    let h = Harness::with_window(Duration::seconds(-1));
    let flight_id = h.add_flight(2, 2, 100);
    let booking_id = h.book(flight_id, 2).await;

    assert_eq!(h.saga.handle_expiry(booking_id).await.unwrap(), SagaOutcome::Applied(BookingStatus::Expired));
    let late = h.saga.handle_payment_outcome(&payment(booking_id, PaymentResult::Success)).await.unwrap();

    assert_eq!(late, SagaOutcome::Discarded(DiscardReason::AlreadyResolved(BookingStatus::Expired)));
    assert_eq!(h.available(flight_id), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_transition_exactly_once() {
    for _ in 0..50 {
        let h = Harness::with_window(Duration::zero());
        let flight_id = h.add_flight(2, 2, 100);
        let booking_id = h.book(flight_id, 2).await;

        let a = {
            let saga = h.saga.clone();
            tokio::spawn(async move { saga.handle_payment_outcome(&payment(booking_id, PaymentResult::Failure)).await })
        };
        let b = {
            let saga = h.saga.clone();
            tokio::spawn(async move { saga.handle_expiry(booking_id).await })
        };

        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let applied = outcomes.iter().filter(|o| matches!(o, SagaOutcome::Applied(_))).count();

        assert_eq!(applied, 1);
        assert_eq!(h.available(flight_id), 2);
        assert!(matches!(h.status(booking_id).await, BookingStatus::FailedPayment | BookingStatus::Expired));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_respect_capacity() {
    let h = Harness::new();
    let flight_id = h.add_flight(20, 20, 100);

    let mut tasks = Vec::new();
    for i in 0..30 {
        let saga = h.saga.clone();
        tasks.push(tokio::spawn(async move {
            saga.create_booking(CreateBookingRequest {
                flight_id,
                user_email: format!("payer{}@example.com", i),
                num_seats: 1,
            })
            .await
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            created += 1;
        }
    }

    assert_eq!(created, 20);
    assert_eq!(h.available(flight_id), 0);
}

#[tokio::test]
async fn test_unknown_booking_is_discarded() {
    let h = Harness::new();

    let outcome = h.saga.handle_expiry(Uuid::new_v4()).await.unwrap();
    assert_eq!(outcome, SagaOutcome::Discarded(DiscardReason::UnknownBooking));

    let outcome = h.saga.handle_payment_outcome(&payment(Uuid::new_v4(), PaymentResult::Success)).await.unwrap();
    assert_eq!(outcome, SagaOutcome::Discarded(DiscardReason::UnknownBooking));
}

#[tokio::test]
async fn test_create_publishes_request_notification_and_expiry() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 10, 150);
    let booking_id = h.book(flight_id, 2).await;

    assert!(h.bus.wait_for_published(2, StdDuration::from_secs(2)).await);

    let requests = h.bus.published_on(topics::PAYMENT_REQUEST);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key, booking_id.to_string());
    let body: serde_json::Value = serde_json::from_str(&requests[0].payload).unwrap();
    assert_eq!(body["amount"], 300);

    let pending = h.bus.published_on(topics::NOTIFICATION_PENDING);
    assert_eq!(pending.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&pending[0].payload).unwrap();
    assert!(body["details"].as_str().unwrap().starts_with("Please complete payment of 300 before "));

    let scheduled = h.bus.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].topic, topics::BOOKING_EXPIRED);
    let due = h.saga.get_booking(booking_id).await.unwrap().payment_due_timestamp;
    assert!(scheduled[0].deliver_at_ms * 1000 >= due.timestamp_micros());
}

#[tokio::test]
async fn test_expiry_is_never_scheduled_before_the_deadline() {
    let h = Harness::new();
    let flight_id = h.add_flight(500, 500, 100);

    for _ in 0..200 {
        let booking_id = h.book(flight_id, 1).await;
        let due = h.saga.get_booking(booking_id).await.unwrap().payment_due_timestamp;
        let key = booking_id.to_string();
        let expiry = h.bus.scheduled().into_iter().find(|m| m.key == key).unwrap();
        assert!(expiry.deliver_at_ms * 1000 >= due.timestamp_micros());
    }
}

#[tokio::test]
async fn test_early_expiry_is_rescheduled_for_the_deadline() {
    let h = Harness::new();
    let flight_id = h.add_flight(4, 4, 100);
    let booking_id = h.book(flight_id, 2).await;
    let due = h.saga.get_booking(booking_id).await.unwrap().payment_due_timestamp;

    let outcome = h.saga.handle_expiry(booking_id).await.unwrap();
    assert_eq!(outcome, SagaOutcome::Discarded(DiscardReason::NotYetDue));

    let scheduled = h.bus.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert!(scheduled.iter().all(|m| m.topic == topics::BOOKING_EXPIRED));
    assert!(scheduled[1].deliver_at_ms * 1000 >= due.timestamp_micros());
    assert_eq!(h.status(booking_id).await, BookingStatus::PendingPayment);

    h.bus.set_unavailable(true);
    let err = h.saga.handle_expiry(booking_id).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_consistency_violation_propagates_and_is_counted() {
    let h = Harness::new();
    let flight_id = h.add_flight(2, 2, 100);
    let booking_id = h.book(flight_id, 2).await;

    // Counter restored out of band, so the compensating release would overflow.
    let mut flight = h.store.flight(flight_id).unwrap();
    flight.available_seats = flight.total_seats;
    h.store.insert_flight(flight);

    let err = h
        .saga
        .handle_payment_outcome(&payment(booking_id, PaymentResult::Failure))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ConsistencyViolation(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.status(booking_id).await, BookingStatus::PendingPayment);
    assert_eq!(h.available(flight_id), 2);
    let text = h.saga.metrics().render().unwrap();
    assert!(text.contains("skybook_consistency_violations_total 1"));
}

#[tokio::test]
async fn test_bus_outage_does_not_fail_committed_booking() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 10, 100);
    h.bus.set_unavailable(true);

    let booking_id = h.book(flight_id, 1).await;

    assert_eq!(h.status(booking_id).await, BookingStatus::PendingPayment);
    assert_eq!(h.available(flight_id), 9);
    assert!(h.bus.scheduled().is_empty());
    let text = h.saga.metrics().render().unwrap();
    assert!(text.contains(r#"skybook_outbound_publish_failures_total{topic="booking.expired"} 1"#));
}

#[tokio::test]
async fn test_store_outage_is_retryable() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 10, 100);
    h.store.set_unavailable(true);

    let err = h
        .saga
        .create_booking(CreateBookingRequest {
            flight_id,
            user_email: "traveler@example.com".to_string(),
            num_seats: 1,
        })
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    assert!(h.saga.handle_expiry(Uuid::new_v4()).await.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_reconciler_expires_overdue_bookings() {
    let h = Harness::with_window(Duration::minutes(-10));
    let flight_id = h.add_flight(6, 6, 100);
    let overdue = h.book(flight_id, 2).await;

    let reconciler = OverdueReconciler::new(h.saga.clone(), h.store.clone(), Duration::seconds(60), StdDuration::from_secs(60));

    assert_eq!(reconciler.reconcile_once().await.unwrap(), 1);
    assert_eq!(h.status(overdue).await, BookingStatus::Expired);
    assert_eq!(h.available(flight_id), 6);

    assert_eq!(reconciler.reconcile_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reconciler_moves_past_bookings_it_cannot_expire() {
    let h = Harness::with_window(Duration::minutes(-10));
    let broken_flight = h.add_flight(2, 2, 100);
    let healthy_flight = h.add_flight(2, 2, 100);
    let broken = h.book(broken_flight, 2).await;
    let healthy = h.book(healthy_flight, 2).await;

    let mut flight = h.store.flight(broken_flight).unwrap();
    flight.available_seats = flight.total_seats;
    h.store.insert_flight(flight);

    let reconciler = OverdueReconciler::new(h.saga.clone(), h.store.clone(), Duration::seconds(60), StdDuration::from_secs(60))
        .with_batch_size(1);

    assert_eq!(reconciler.reconcile_once().await.unwrap(), 1);
    assert_eq!(h.status(healthy).await, BookingStatus::Expired);
    assert_eq!(h.available(healthy_flight), 2);
    assert_eq!(h.status(broken).await, BookingStatus::PendingPayment);
}

#[tokio::test]
async fn test_reconciler_respects_grace_period() {
    let h = Harness::with_window(Duration::seconds(-30));
    let flight_id = h.add_flight(6, 6, 100);
    let booking_id = h.book(flight_id, 1).await;

    let reconciler = OverdueReconciler::new(h.saga.clone(), h.store.clone(), Duration::minutes(5), StdDuration::from_secs(60));

    assert_eq!(reconciler.reconcile_once().await.unwrap(), 0);
    assert_eq!(h.status(booking_id).await, BookingStatus::PendingPayment);
}

#[tokio::test]
async fn test_handlers_parse_wire_payloads() {
    let h = Harness::new();
    let flight_id = h.add_flight(5, 5, 100);
    let booking_id = h.book(flight_id, 1).await;

    let handler = PaymentOutcomeHandler::new(h.saga.clone());
    let payload = format!(r#"{{"booking_id":"{}","payment_status":"FAILURE","reason":"Insufficient funds"}}"#, booking_id);
    handler.handle(topics::PAYMENT_STATUS, &payload).await.unwrap();

    assert_eq!(h.status(booking_id).await, BookingStatus::FailedPayment);
    assert_eq!(h.available(flight_id), 5);
}

#[tokio::test]
async fn test_malformed_payload_is_not_retryable() {
    let h = Harness::new();
    let handler = ExpiryHandler::new(h.saga.clone());

    let err = handler.handle(topics::BOOKING_EXPIRED, "{\"booking\":42}").await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert!(!err.is_retryable());

    let text = h.saga.metrics().render().unwrap();
    assert!(text.contains(r#"skybook_handler_failures_total{kind="fatal",topic="booking.expired"} 1"#));
}

#[tokio::test]
async fn test_scheduled_expiry_message_drives_expiry_handler() {
    let h = Harness::with_window(Duration::zero());
    let flight_id = h.add_flight(3, 3, 100);
    let booking_id = h.book(flight_id, 3).await;

    let due = h.bus.take_due(Utc::now().timestamp_millis() + 1);
    assert_eq!(due.len(), 1);

    let handler = ExpiryHandler::new(h.saga.clone());
    handler.handle(&due[0].topic, &due[0].payload).await.unwrap();

    assert_eq!(h.status(booking_id).await, BookingStatus::Expired);
    assert_eq!(h.available(flight_id), 3);
}

#[tokio::test]
async fn test_reads_attach_flight_and_order_newest_first() {
    let h = Harness::new();
    let flight_id = h.add_flight(10, 10, 100);
    let first = h.book(flight_id, 1).await;
    let second = h.book(flight_id, 2).await;

    let listed = h.saga.list_bookings("traveler@example.com").await.unwrap();
    assert_eq!(listed.iter().map(|b| b.booking_id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(listed[0].flight.as_ref().unwrap().id, flight_id);

    assert!(h.saga.list_bookings("someone-else@example.com").await.unwrap().is_empty());

    let missing = Uuid::new_v4();
    assert!(matches!(h.saga.get_booking(missing).await, Err(CoreError::BookingNotFound(id)) if id == missing));
}

#[tokio::test]
async fn test_search_filters_case_insensitively() {
    let h = Harness::new();
    h.add_flight(10, 10, 100);

    let page = h
        .saga
        .search_flights(FlightSearchRequest {
            origin: Some("jfk".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.page, 1);
    assert_eq!(page.limit, 10);

    let none = h
        .saga
        .search_flights(FlightSearchRequest {
            destination: Some("SFO".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(none.total, 0);
    assert_eq!(none.total_pages, 0);

    let bad = FlightSearchRequest { limit: Some(0), ..Default::default() };
    assert!(matches!(h.saga.search_flights(bad).await, Err(CoreError::ValidationError(_))));
}
