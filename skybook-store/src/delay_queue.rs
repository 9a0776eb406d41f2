use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use skybook_core::{CoreError, CoreResult};
use crate::app_config::DeliveryConfig;
use crate::events::EventProducer;
use crate::redis_repo::{redis_err, RedisClient};

/// A message parked until `deliver_at_ms`.
///
/// The `id` keeps two identical payloads scheduled for the same instant from
/// collapsing into one sorted-set member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelayedMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub deliver_at_ms: i64,
}

impl DelayedMessage {
    pub fn new(topic: &str, key: &str, payload: &str, deliver_at_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
            deliver_at_ms,
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.deliver_at_ms <= now_ms
    }
}

/// Score for `now + delay`, rounded up to the next whole millisecond so the
/// message never becomes due before the full delay has passed.
pub fn deliver_at_ms(now: DateTime<Utc>, delay: Duration) -> i64 {
    let due = chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d));
    match due {
        Some(due) => due.timestamp_millis() + i64::from(due.timestamp_subsec_nanos() % 1_000_000 != 0),
        None => i64::MAX,
    }
}

/// A due member plus the raw string needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message: DelayedMessage,
    raw: String,
}

#[derive(Clone)]
pub struct DelayQueue {
    redis: RedisClient,
    key: String,
    lease: Duration,
}

impl DelayQueue {
    pub fn new(redis: RedisClient, key: impl Into<String>, lease: Duration) -> Self {
        Self { redis, key: key.into(), lease }
    }

    pub async fn schedule(&self, topic: &str, key: &str, payload: &str, delay: Duration) -> CoreResult<()> {
        let deliver_at_ms = deliver_at_ms(Utc::now(), delay);
        let message = DelayedMessage::new(topic, key, payload, deliver_at_ms);

        let member = serde_json::to_string(&message)
            .map_err(|e| CoreError::InternalError(format!("delayed envelope: {}", e)))?;

        self.redis.zadd_delayed(&self.key, &member, deliver_at_ms).await.map_err(redis_err)?;
        debug!(topic, key, deliver_at_ms, "Scheduled delayed message");
        Ok(())
    }

    pub async fn claim_due(&self, limit: usize) -> CoreResult<Vec<ClaimedMessage>> {
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);

        let members = self
            .redis
            .claim_due(&self.key, now_ms, limit, now_ms.saturating_add(lease_ms))
            .await
            .map_err(redis_err)?;

        let mut claimed = Vec::with_capacity(members.len());
        for raw in members {
            match serde_json::from_str::<DelayedMessage>(&raw) {
                Ok(message) => claimed.push(ClaimedMessage { message, raw }),
                Err(e) => {
                    // Unreadable members would be re-claimed forever.
                    error!(error = %e, "Dropping malformed delayed message");
                    self.redis.zrem(&self.key, &raw).await.map_err(redis_err)?;
                }
            }
        }

        Ok(claimed)
    }

    pub async fn acknowledge(&self, claimed: &ClaimedMessage) -> CoreResult<()> {
        self.redis.zrem(&self.key, &claimed.raw).await.map_err(redis_err)
    }
}

/// Moves due messages from the delay queue onto Kafka.
pub struct DelaySweeper {
    queue: DelayQueue,
    producer: EventProducer,
    interval: Duration,
    batch_size: usize,
}

impl DelaySweeper {
    pub fn new(queue: DelayQueue, producer: EventProducer, config: &DeliveryConfig) -> Self {
        Self {
            queue,
            producer,
            interval: Duration::from_millis(config.sweep_interval_ms),
            batch_size: config.sweep_batch_size,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Delay sweeper started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Delay sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Delay sweeper stopped");
    }

    /// Returns how many messages were handed to Kafka.
    pub async fn sweep_once(&self) -> CoreResult<usize> {
        let claimed = self.queue.claim_due(self.batch_size).await?;
        let mut delivered = 0;

        for item in &claimed {
            let msg = &item.message;
            // Left in place on failure; the lease expiry makes it due again.
            if let Err(e) = self.producer.publish(&msg.topic, &msg.key, &msg.payload).await {
                warn!(topic = %msg.topic, key = %msg.key, error = %e, "Delayed publish failed, will retry after lease");
                continue;
            }
            self.queue.acknowledge(item).await?;
            delivered += 1;
        }

        if delivered > 0 {
            debug!(delivered, "Delayed messages released");
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_envelopes_for_same_payload_are_distinct_members() {
        let a = DelayedMessage::new("booking.expired", "b-1", r#"{"booking_id":"b-1"}"#, 1_000);
        let b = DelayedMessage::new("booking.expired", "b-1", r#"{"booking_id":"b-1"}"#, 1_000);

        assert_ne!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn test_due_is_inclusive_of_deadline() {
        let msg = DelayedMessage::new("t", "k", "p", 1_000);

        assert!(!msg.is_due(999));
        assert!(msg.is_due(1_000));
        assert!(msg.is_due(1_001));
    }

    #[test]
    fn test_deliver_at_rounds_partial_milliseconds_up() {
        let now = Utc.timestamp_opt(1_700_000_000, 400_000).unwrap();

        assert_eq!(deliver_at_ms(now, Duration::from_micros(100)), 1_700_000_000_001);
        assert_eq!(deliver_at_ms(now, Duration::from_micros(600)), 1_700_000_000_001);
        assert_eq!(deliver_at_ms(now, Duration::from_micros(601)), 1_700_000_000_002);
        assert_eq!(deliver_at_ms(now, Duration::MAX), i64::MAX);
    }
}
