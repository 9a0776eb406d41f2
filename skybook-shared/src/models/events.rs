use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Asks the payment authority to collect `amount` before the deadline.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct PaymentRequestEvent {
    pub booking_id: Uuid,
    pub flight_id: Uuid,
    pub amount: i64,
    pub payment_due_timestamp: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    #[serde(rename = "BOOKING_PENDING_PAYMENT")]
    Pending,
    #[serde(rename = "BOOKING_CONFIRMED")]
    Confirmed,
    #[serde(rename = "BOOKING_PAYMENT_FAILED")]
    Failed,
    #[serde(rename = "BOOKING_EXPIRED")]
    Expired,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub email_to: String,
    pub booking_id: Uuid,
    pub details: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PaymentResult {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED", alias = "FAILURE")]
    Failure,
}

/// Result reported by the payment authority. May arrive late or more than once.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct PaymentOutcomeMessage {
    pub booking_id: Uuid,
    pub payment_status: PaymentResult,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub payment_timestamp: Option<DateTime<Utc>>,
}

impl PaymentOutcomeMessage {
    pub fn failure_reason(&self) -> String {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("Payment declined")
            .to_string()
    }
}

/// Fired once the payment window of a booking has elapsed.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ExpiryMessage {
    pub booking_id: Uuid,
}
