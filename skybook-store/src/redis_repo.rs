use redis::{AsyncCommands, RedisResult};
use tracing::debug;
use skybook_core::CoreError;

/// Sorted-set primitives backing the delayed-delivery queue.
///
/// Members are serialized envelopes, scored by their delivery time in epoch
/// milliseconds.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn zadd_delayed(&self, key: &str, member: &str, deliver_at_ms: i64) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.zadd(key, member, deliver_at_ms).await?;
        debug!(key, deliver_at_ms, "Delayed message stored");
        Ok(())
    }

    /// Claim up to `limit` members due at `now_ms` by pushing their score out
    /// to `lease_until_ms`.
    ///
    /// A claimed member stays in the set until acknowledged, so a sweeper that
    /// dies mid-publish only delays delivery until the lease runs out.
    pub async fn claim_due(&self, key: &str, now_ms: i64, limit: usize, lease_until_ms: i64) -> RedisResult<Vec<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Read-and-bump in one script; two sweepers never claim the same member.
        let script = redis::Script::new(r#"
            local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
            for _, member in ipairs(due) do
                redis.call('ZADD', KEYS[1], 'XX', ARGV[3], member)
            end
            return due
        "#);

        script
            .key(key)
            .arg(now_ms)
            .arg(limit)
            .arg(lease_until_ms)
            .invoke_async(&mut conn)
            .await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }
}

pub fn redis_err(err: redis::RedisError) -> CoreError {
    CoreError::BusUnavailable(format!("redis: {}", err))
}
