use async_trait::async_trait;
use std::time::Duration;
use crate::CoreResult;

/// Routing keys. Each maps to one topic on the broker.
pub mod topics {
    pub const PAYMENT_REQUEST: &str = "payment.request";
    pub const PAYMENT_STATUS: &str = "payment.status";
    pub const BOOKING_EXPIRED: &str = "booking.expired";
    pub const NOTIFICATION_PENDING: &str = "notification.pending";
    pub const NOTIFICATION_SUCCESS: &str = "notification.success";
    pub const NOTIFICATION_FAILED: &str = "notification.failed";
    pub const NOTIFICATION_EXPIRED: &str = "notification.expired";
}

/// Outbound side of the message bus.
///
/// `publish` is at-least-once with no cross-topic ordering. `schedule_delayed`
/// delivers no earlier than `delay` from now; later is allowed.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> CoreResult<()>;

    async fn schedule_delayed(&self, topic: &str, key: &str, payload: &str, delay: Duration) -> CoreResult<()>;
}

/// Inbound side: invoked once per delivered message.
///
/// Returning `Ok` acknowledges the message. A retryable error asks for
/// redelivery; any other error is final for that message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &str) -> CoreResult<()>;
}
