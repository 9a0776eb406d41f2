use std::sync::Arc;
use std::time::Duration;
use chrono::SecondsFormat;
use tracing::debug;
use skybook_core::bus::{topics, EventBus};
use skybook_core::{Booking, CoreError, CoreResult};
use skybook_shared::models::events::{ExpiryMessage, NotificationEvent, NotificationKind, PaymentRequestEvent};

/// Routing key for each notification type.
pub fn notification_topic(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Pending => topics::NOTIFICATION_PENDING,
        NotificationKind::Confirmed => topics::NOTIFICATION_SUCCESS,
        NotificationKind::Failed => topics::NOTIFICATION_FAILED,
        NotificationKind::Expired => topics::NOTIFICATION_EXPIRED,
    }
}

pub fn pending_details(booking: &Booking) -> String {
    format!(
        "Please complete payment of {} before {}",
        booking.total_price,
        booking.payment_due_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

pub const CONFIRMED_DETAILS: &str = "Your booking has been confirmed.";
pub const EXPIRED_DETAILS: &str = "Booking expired due to no payment.";

pub fn failed_details(reason: &str) -> String {
    format!("Payment failed: {}", reason)
}

fn encode<T: serde::Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::InternalError(format!("encode event: {}", e)))
}

/// Turns saga decisions into bus messages. Every message is keyed by booking id.
#[derive(Clone)]
pub struct Dispatcher {
    bus: Arc<dyn EventBus>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn request_payment(&self, booking: &Booking) -> CoreResult<()> {
        let event = PaymentRequestEvent {
            booking_id: booking.id,
            flight_id: booking.flight_id,
            amount: booking.total_price,
            payment_due_timestamp: booking.payment_due_at,
        };
        self.bus
            .publish(topics::PAYMENT_REQUEST, &booking.id.to_string(), &encode(&event)?)
            .await
    }

    pub async fn notify(&self, kind: NotificationKind, booking: &Booking, details: String) -> CoreResult<()> {
        let event = NotificationEvent {
            kind,
            email_to: booking.user_email.clone(),
            booking_id: booking.id,
            details,
        };
        let topic = notification_topic(kind);
        self.bus.publish(topic, &booking.id.to_string(), &encode(&event)?).await?;
        debug!(booking_id = %booking.id, topic, "Notification published");
        Ok(())
    }

    pub async fn schedule_expiry(&self, booking: &Booking, delay: Duration) -> CoreResult<()> {
        let message = ExpiryMessage { booking_id: booking.id };
        self.bus
            .schedule_delayed(topics::BOOKING_EXPIRED, &booking.id.to_string(), &encode(&message)?, delay)
            .await
    }
}
