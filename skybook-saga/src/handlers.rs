use std::sync::Arc;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::error;
use skybook_core::bus::MessageHandler;
use skybook_core::{CoreError, CoreResult};
use skybook_shared::models::events::{ExpiryMessage, PaymentOutcomeMessage};
use crate::orchestrator::BookingSaga;

fn parse<T: DeserializeOwned>(topic: &str, payload: &str) -> CoreResult<T> {
    serde_json::from_str(payload)
        .map_err(|e| CoreError::ValidationError(format!("malformed {} payload: {}", topic, e)))
}

fn observe(saga: &BookingSaga, topic: &str, result: CoreResult<()>) -> CoreResult<()> {
    if let Err(e) = &result {
        saga.metrics().handler_failed(topic, e.is_retryable());
        if !e.is_retryable() {
            error!(topic, code = e.code(), error = %e, "Message handling failed");
        }
    }
    result
}

/// Consumes `payment.status`.
pub struct PaymentOutcomeHandler {
    saga: Arc<BookingSaga>,
}

impl PaymentOutcomeHandler {
    pub fn new(saga: Arc<BookingSaga>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl MessageHandler for PaymentOutcomeHandler {
    async fn handle(&self, topic: &str, payload: &str) -> CoreResult<()> {
        let result: CoreResult<()> = async {
            let msg: PaymentOutcomeMessage = parse(topic, payload)?;
            self.saga.handle_payment_outcome(&msg).await.map(|_| ())
        }
        .await;
        observe(&self.saga, topic, result)
    }
}

/// Consumes `booking.expired`.
pub struct ExpiryHandler {
    saga: Arc<BookingSaga>,
}

impl ExpiryHandler {
    pub fn new(saga: Arc<BookingSaga>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl MessageHandler for ExpiryHandler {
    async fn handle(&self, topic: &str, payload: &str) -> CoreResult<()> {
        let result: CoreResult<()> = async {
            let msg: ExpiryMessage = parse(topic, payload)?;
            self.saga.handle_expiry(msg.booking_id).await.map(|_| ())
        }
        .await;
        observe(&self.saga, topic, result)
    }
}
