use prometheus::{opts, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

/// Counters for the booking saga, on a registry owned by this struct so
/// tests can build as many as they like.
#[derive(Clone)]
pub struct SagaMetrics {
    registry: Arc<Registry>,
    bookings_created: IntCounter,
    booking_rejections: IntCounterVec,
    booking_transitions: IntCounterVec,
    messages_discarded: IntCounterVec,
    consistency_violations: IntCounter,
    outbound_publish_failures: IntCounterVec,
    handler_failures: IntCounterVec,
}

impl SagaMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings_created = IntCounter::with_opts(opts!(
            "skybook_bookings_created_total",
            "Bookings created in PENDING_PAYMENT"
        ))?;
        let booking_rejections = IntCounterVec::new(
            opts!("skybook_booking_rejections_total", "CreateBooking calls rejected, by error code"),
            &["reason"],
        )?;
        let booking_transitions = IntCounterVec::new(
            opts!("skybook_booking_transitions_total", "Applied booking transitions, by target status"),
            &["status"],
        )?;
        let messages_discarded = IntCounterVec::new(
            opts!("skybook_messages_discarded_total", "Inbound messages that changed nothing"),
            &["reason"],
        )?;
        let consistency_violations = IntCounter::with_opts(opts!(
            "skybook_consistency_violations_total",
            "Seat releases that would have exceeded capacity"
        ))?;
        let outbound_publish_failures = IntCounterVec::new(
            opts!("skybook_outbound_publish_failures_total", "Events that could not be published"),
            &["topic"],
        )?;
        let handler_failures = IntCounterVec::new(
            opts!("skybook_handler_failures_total", "Inbound message handler failures"),
            &["topic", "kind"],
        )?;

        registry.register(Box::new(bookings_created.clone()))?;
        registry.register(Box::new(booking_rejections.clone()))?;
        registry.register(Box::new(booking_transitions.clone()))?;
        registry.register(Box::new(messages_discarded.clone()))?;
        registry.register(Box::new(consistency_violations.clone()))?;
        registry.register(Box::new(outbound_publish_failures.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            bookings_created,
            booking_rejections,
            booking_transitions,
            messages_discarded,
            consistency_violations,
            outbound_publish_failures,
            handler_failures,
        })
    }

    pub fn booking_created(&self) {
        self.bookings_created.inc();
    }

    pub fn booking_rejected(&self, code: &str) {
        self.booking_rejections.with_label_values(&[code]).inc();
    }

    pub fn transition_applied(&self, status: &str) {
        self.booking_transitions.with_label_values(&[status]).inc();
    }

    pub fn message_discarded(&self, reason: &str) {
        self.messages_discarded.with_label_values(&[reason]).inc();
    }

    pub fn consistency_violation(&self) {
        self.consistency_violations.inc();
    }

    pub fn publish_failed(&self, topic: &str) {
        self.outbound_publish_failures.with_label_values(&[topic]).inc();
    }

    pub fn handler_failed(&self, topic: &str, retryable: bool) {
        let kind = if retryable { "retryable" } else { "fatal" };
        self.handler_failures.with_label_values(&[topic, kind]).inc();
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
