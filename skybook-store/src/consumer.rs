use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use skybook_core::bus::{EventBus, MessageHandler};
use crate::app_config::{DeliveryConfig, KafkaConfig};

/// Capped exponential backoff between redeliveries of a retryable failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.retry_backoff_ms),
            max: Duration::from_millis(config.max_retry_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handled; the offset can be committed.
    Processed,
    /// Failed for good and parked on the dead-letter topic; commit as well.
    DeadLettered,
    /// Shutdown arrived mid-retry; leave the offset so the message comes back.
    Interrupted,
}

/// Body published to the dead-letter topic.
#[derive(Debug, Serialize)]
pub struct DeadLetter<'a> {
    pub topic: &'a str,
    pub payload: &'a str,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

/// Settles one message at a time against a handler.
///
/// Retryable errors are retried in place: the partition's offset cannot move
/// past this message until it resolves. Anything else goes to the dead-letter
/// topic exactly once per delivery.
pub struct MessageProcessor {
    handler: Arc<dyn MessageHandler>,
    dead_letters: Arc<dyn EventBus>,
    dead_letter_topic: String,
    policy: RetryPolicy,
}

impl MessageProcessor {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        dead_letters: Arc<dyn EventBus>,
        dead_letter_topic: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            handler,
            dead_letters,
            dead_letter_topic: dead_letter_topic.into(),
            policy,
        }
    }

    pub async fn deliver(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Delivery {
        let mut attempt = 0u32;

        let failure = loop {
            match self.handler.handle(topic, payload).await {
                Ok(()) => return Delivery::Processed,
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let delay = self.policy.backoff(attempt);
                    warn!(topic, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Handler failed, retrying");
                    if !pause(delay, shutdown).await {
                        return Delivery::Interrupted;
                    }
                }
                Err(e) => break e,
            }
        };

        error!(topic, error = %failure, code = failure.code(), "Handler rejected message, dead-lettering");

        let letter = DeadLetter {
            topic,
            payload,
            error: failure.to_string(),
            failed_at: Utc::now(),
        };
        let body = match serde_json::to_string(&letter) {
            Ok(body) => body,
            Err(e) => {
                error!(topic, error = %e, "Could not encode dead letter, dropping message");
                return Delivery::DeadLettered;
            }
        };

        let mut attempt = 0u32;
        loop {
            match self.dead_letters.publish(&self.dead_letter_topic, key, &body).await {
                Ok(()) => return Delivery::DeadLettered,
                Err(e) => {
                    attempt += 1;
                    warn!(topic = %self.dead_letter_topic, attempt, error = %e, "Dead-letter publish failed, retrying");
                    if !pause(self.policy.backoff(attempt), shutdown).await {
                        return Delivery::Interrupted;
                    }
                }
            }
        }
    }
}

/// One Kafka subscription feeding one handler, committing offsets only after
/// the processor settles the message.
pub struct EventConsumer {
    consumer: StreamConsumer,
    topic: String,
    processor: MessageProcessor,
    idle_backoff: Duration,
}

impl EventConsumer {
    pub fn new(
        kafka: &KafkaConfig,
        delivery: &DeliveryConfig,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        dead_letters: Arc<dyn EventBus>,
    ) -> Result<Self, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", &kafka.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[topic])?;

        let policy = RetryPolicy::from_config(delivery);
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            idle_backoff: policy.initial,
            processor: MessageProcessor::new(handler, dead_letters, kafka.dead_letter_topic.clone(), policy),
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "Consumer started");

        loop {
            let received = tokio::select! {
                m = self.consumer.recv() => m,
                _ = shutdown.changed() => break,
            };

            let message = match received {
                Ok(m) => m,
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Kafka error");
                    if !pause(self.idle_backoff, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            // Non-UTF-8 bodies still reach the handler and fail its parse.
            let payload = message.payload().map(String::from_utf8_lossy).unwrap_or_default();
            let key = message.key().map(String::from_utf8_lossy).unwrap_or_default();

            let outcome = self.processor.deliver(&self.topic, &key, &payload, &mut shutdown).await;

            if outcome == Delivery::Interrupted {
                break;
            }

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                error!(topic = %self.topic, offset = message.offset(), error = %e, "Offset commit failed");
            }
        }

        info!(topic = %self.topic, "Consumer stopped");
    }
}
