use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};
use skybook_core::bus::EventBus;
use skybook_core::{CoreError, CoreResult};
use crate::app_config::KafkaConfig;
use crate::delay_queue::DelayQueue;

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> CoreResult<()> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(topic, key, partition = delivery.partition, offset = delivery.offset, "Message delivered");
                Ok(())
            }
            Err((e, _msg)) => {
                error!(topic, key, error = %e, "Failed to send message");
                Err(CoreError::BusUnavailable(format!("kafka: {}", e)))
            }
        }
    }
}

/// Kafka for immediate delivery, the Redis delay queue for everything else.
#[derive(Clone)]
pub struct KafkaEventBus {
    producer: EventProducer,
    delays: DelayQueue,
}

impl KafkaEventBus {
    pub fn new(producer: EventProducer, delays: DelayQueue) -> Self {
        Self { producer, delays }
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> CoreResult<()> {
        self.producer.publish(topic, key, payload).await
    }

    async fn schedule_delayed(&self, topic: &str, key: &str, payload: &str, delay: Duration) -> CoreResult<()> {
        self.delays.schedule(topic, key, payload, delay).await
    }
}
