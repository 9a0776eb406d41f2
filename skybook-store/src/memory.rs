//! In-process backends for the repository and bus traits.
//!
//! Both keep the same atomicity the Postgres and Kafka implementations give:
//! every repository call runs under one lock, so a check and the write that
//! depends on it can never interleave with another caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;
use skybook_core::bus::EventBus;
use skybook_core::repository::{BookingRepository, FlightRepository, OverdueCursor};
use skybook_core::search::{FlightPage, FlightSearchCriteria};
use skybook_core::{Booking, BookingStatus, CoreError, CoreResult, Flight, NewBooking, ResolveOutcome, Trigger};
use crate::delay_queue::{deliver_at_ms, DelayedMessage};

#[derive(Default)]
struct StoreState {
    flights: HashMap<Uuid, Flight>,
    // Insertion order; newest last.
    bookings: Vec<Booking>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_flight(&self, flight: Flight) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.flights.insert(flight.id, flight);
    }

    pub fn flight(&self, id: Uuid) -> Option<Flight> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.flights.get(&id).cloned()
    }

    /// Every call fails with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, StoreState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::StoreUnavailable("in-memory store marked unavailable".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| CoreError::InternalError("in-memory store lock poisoned".to_string()))
    }
}

fn matches(flight: &Flight, criteria: &FlightSearchCriteria) -> bool {
    let origin_ok = criteria
        .origin
        .as_ref()
        .map_or(true, |o| flight.origin.eq_ignore_ascii_case(o));
    let destination_ok = criteria
        .destination
        .as_ref()
        .map_or(true, |d| flight.destination.eq_ignore_ascii_case(d));
    let date_ok = criteria
        .date
        .map_or(true, |date| flight.departure_time.date_naive() == date);

    origin_ok && destination_ok && date_ok
}

#[async_trait]
impl FlightRepository for InMemoryStore {
    async fn get_flight(&self, id: Uuid) -> CoreResult<Option<Flight>> {
        let state = self.lock()?;
        Ok(state.flights.get(&id).cloned())
    }

    async fn search_flights(&self, criteria: &FlightSearchCriteria) -> CoreResult<FlightPage> {
        let state = self.lock()?;

        let mut hits: Vec<&Flight> = state.flights.values().filter(|f| matches(f, criteria)).collect();
        hits.sort_by(|a, b| a.departure_time.cmp(&b.departure_time).then(a.id.cmp(&b.id)));

        let total = hits.len() as i64;
        let page = hits
            .into_iter()
            .skip(criteria.offset() as usize)
            .take(criteria.limit as usize)
            .cloned()
            .collect();

        Ok(FlightPage::new(page, total, criteria))
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn create_booking(&self, draft: NewBooking) -> CoreResult<Booking> {
        let mut state = self.lock()?;

        let flight = state
            .flights
            .get_mut(&draft.flight_id)
            .ok_or(CoreError::FlightNotFound(draft.flight_id))?;
        let total_price = flight.price_for(draft.num_seats)?;
        flight.reserve(draft.num_seats)?;

        let now = Utc::now();
        let booking = Booking {
            id: draft.id,
            flight_id: draft.flight_id,
            user_email: draft.user_email,
            num_seats: draft.num_seats,
            total_price,
            status: BookingStatus::PendingPayment,
            payment_due_at: draft.payment_due_at,
            created_at: now,
            updated_at: now,
        };
        state.bookings.push(booking.clone());

        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let state = self.lock()?;
        Ok(state.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn list_bookings(&self, user_email: &str) -> CoreResult<Vec<Booking>> {
        let state = self.lock()?;
        Ok(state
            .bookings
            .iter()
            .rev()
            .filter(|b| b.user_email == user_email)
            .cloned()
            .collect())
    }

    async fn resolve_booking(&self, id: Uuid, trigger: &Trigger) -> CoreResult<ResolveOutcome> {
        let mut state = self.lock()?;

        let Some(idx) = state.bookings.iter().position(|b| b.id == id) else {
            return Ok(ResolveOutcome::NotFound);
        };

        let booking = state.bookings[idx].clone();
        let Some(transition) = booking.status.on(trigger) else {
            return Ok(ResolveOutcome::Ignored(booking));
        };

        // Release before the status write so a failed release leaves both untouched.
        if transition.release_seats {
            let flight = state
                .flights
                .get_mut(&booking.flight_id)
                .ok_or(CoreError::FlightNotFound(booking.flight_id))?;
            flight.release(booking.num_seats)?;
        }

        let stored = &mut state.bookings[idx];
        stored.status = transition.to;
        stored.updated_at = Utc::now();

        Ok(ResolveOutcome::Applied {
            booking: stored.clone(),
            transition,
        })
    }

    async fn list_overdue(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<OverdueCursor>,
        limit: u32,
    ) -> CoreResult<Vec<OverdueCursor>> {
        let state = self.lock()?;

        let mut overdue: Vec<OverdueCursor> = state
            .bookings
            .iter()
            .filter(|b| b.status == BookingStatus::PendingPayment && b.payment_due_at <= cutoff)
            .map(|b| OverdueCursor { payment_due_at: b.payment_due_at, booking_id: b.id })
            .filter(|c| after.map_or(true, |a| *c > a))
            .collect();
        overdue.sort();
        overdue.truncate(limit as usize);

        Ok(overdue)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

#[derive(Default)]
struct BusState {
    published: Vec<PublishedMessage>,
    scheduled: Vec<DelayedMessage>,
}

/// Records everything instead of delivering it. Delayed messages are handed
/// back through [`InMemoryBus::take_due`].
#[derive(Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
    unavailable: AtomicBool,
    published_signal: Notify,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::BusUnavailable("in-memory bus marked unavailable".to_string()));
        }
        Ok(())
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state().published.iter().filter(|m| m.topic == topic).cloned().collect()
    }

    pub fn scheduled(&self) -> Vec<DelayedMessage> {
        self.state().scheduled.clone()
    }

    /// Remove and return every scheduled message due at `now_ms`.
    pub fn take_due(&self, now_ms: i64) -> Vec<DelayedMessage> {
        let mut state = self.state();
        let (due, pending) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|m| m.is_due(now_ms));
        state.scheduled = pending;
        due
    }

    /// Wait until at least `count` messages have been published. Fire-and-forget
    /// publishes land on spawned tasks, so tests need a way to wait for them.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.published_signal.notified();
                if self.state().published.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> CoreResult<()> {
        self.check_available()?;
        self.state().published.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        self.published_signal.notify_waiters();
        Ok(())
    }

    async fn schedule_delayed(&self, topic: &str, key: &str, payload: &str, delay: Duration) -> CoreResult<()> {
        self.check_available()?;
        let deliver_at_ms = deliver_at_ms(Utc::now(), delay);
        self.state().scheduled.push(DelayedMessage::new(topic, key, payload, deliver_at_ms));
        Ok(())
    }
}
