//! Redis Streams-backed notification channel
//!
//! One stream per channel name, one consumer group shared by every instance,
//! and a stable consumer name per instance so a restarted process picks up the
//! entries it had read but never settled.
//!
//! Entry fields: `body` (JSON request) and `attempt` (prior failures).

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use redis_utils::{with_timeout_of, RedisPool};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{dead_letter_channel, Delivery, NotificationChannel, VerificationRequest};
use crate::config::{NotificationSettings, RedisSettings};
use crate::error::{IdentityError, Result};

const BODY_FIELD: &str = "body";
const ATTEMPT_FIELD: &str = "attempt";

/// Configuration for the Redis Streams channel
#[derive(Debug, Clone)]
pub struct StreamChannelConfig {
    /// Consumer group name
    pub group: String,
    /// Consumer name (stable per instance)
    pub consumer: String,
    /// How long a read waits for new entries
    pub block: Duration,
    /// Bound on every other round trip
    pub operation_timeout: Duration,
}

impl StreamChannelConfig {
    pub fn from_settings(notifications: &NotificationSettings, redis: &RedisSettings) -> Self {
        Self {
            group: notifications.consumer_group.clone(),
            consumer: notifications.consumer_name.clone(),
            block: Duration::from_millis(notifications.poll_block_ms),
            operation_timeout: redis.operation_timeout(),
        }
    }
}

pub struct RedisStreamChannel {
    pool: RedisPool,
    writer: ConnectionManager,
    // XREADGROUP BLOCK holds its socket; each channel reads on its own
    readers: DashMap<String, ConnectionManager>,
    config: StreamChannelConfig,
}

impl RedisStreamChannel {
    pub fn new(pool: RedisPool, config: StreamChannelConfig) -> Self {
        Self {
            writer: pool.manager(),
            pool,
            readers: DashMap::new(),
            config,
        }
    }

    async fn reader(&self, channel: &str) -> Result<ConnectionManager> {
        if let Some(conn) = self.readers.get(channel) {
            return Ok(conn.clone());
        }

        let conn = self
            .pool
            .dedicated_manager()
            .await
            .map_err(|e| IdentityError::StoreUnavailable(format!("redis: {:#}", e)))?;
        self.readers.insert(channel.to_string(), conn.clone());
        Ok(conn)
    }

    async fn read_one(
        &self,
        conn: &mut ConnectionManager,
        channel: &str,
        from_id: &str,
        block: Option<Duration>,
    ) -> redis::RedisResult<Option<Delivery>> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(1);
        let mut deadline = self.config.operation_timeout;
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
            deadline += block;
        }

        let reply: Option<StreamReadReply> = with_timeout_of(
            deadline,
            conn.xread_options::<_, _, Option<StreamReadReply>>(&[channel], &[from_id], &options),
        )
        .await?;

        Ok(reply
            .and_then(|reply| reply.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next())
            .map(|entry| to_delivery(channel, entry)))
    }
}

fn to_delivery(channel: &str, entry: StreamId) -> Delivery {
    let body = entry.get::<String>(BODY_FIELD).unwrap_or_default();
    let attempt = entry.get::<u32>(ATTEMPT_FIELD).unwrap_or(0);
    Delivery {
        channel: channel.to_string(),
        id: entry.id,
        body,
        attempt,
    }
}

#[async_trait]
impl NotificationChannel for RedisStreamChannel {
    async fn declare(&self, channel: &str) -> Result<()> {
        let mut conn = self.writer.clone();
        let created: std::result::Result<(), redis::RedisError> = with_timeout_of(
            self.config.operation_timeout,
            conn.xgroup_create_mkstream(channel, &self.config.group, "$"),
        )
        .await;

        match created {
            Ok(()) => {
                info!(channel, group = %self.config.group, "Consumer group created");
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(channel, group = %self.config.group, "Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }

        self.reader(channel).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, request: &VerificationRequest) -> Result<()> {
        let body = serde_json::to_string(request)?;
        let mut conn = self.writer.clone();

        let entry_id: String = with_timeout_of(
            self.config.operation_timeout,
            conn.xadd::<_, _, _, _, String>(
                channel,
                "*",
                &[(BODY_FIELD, body.as_str()), (ATTEMPT_FIELD, "0")],
            ),
        )
        .await?;

        debug!(channel, entry_id = %entry_id, "Verification request published");
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Option<Delivery>> {
        let mut conn = self.reader(channel).await?;

        let read = async {
            // Entries read earlier by this consumer but never settled come first
            match self.read_one(&mut conn, channel, "0", None).await? {
                Some(delivery) => Ok::<_, redis::RedisError>(Some(delivery)),
                None => {
                    self.read_one(&mut conn, channel, ">", Some(self.config.block))
                        .await
                }
            }
        };

        match read.await {
            Ok(delivery) => Ok(delivery),
            Err(e) if e.code() == Some("NOGROUP") => {
                warn!(channel, "Consumer group missing, declaring it again");
                self.declare(channel).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.writer.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .xack(&delivery.channel, &self.config.group, &[&delivery.id])
            .ignore()
            .xdel(&delivery.channel, &[&delivery.id])
            .ignore();

        with_timeout_of(
            self.config.operation_timeout,
            pipe.query_async::<_, ()>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        let next_attempt = delivery.attempt.saturating_add(1).to_string();
        let mut conn = self.writer.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .xadd(
                &delivery.channel,
                "*",
                &[
                    (BODY_FIELD, delivery.body.as_str()),
                    (ATTEMPT_FIELD, next_attempt.as_str()),
                ],
            )
            .ignore()
            .xack(&delivery.channel, &self.config.group, &[&delivery.id])
            .ignore()
            .xdel(&delivery.channel, &[&delivery.id])
            .ignore();

        with_timeout_of(
            self.config.operation_timeout,
            pipe.query_async::<_, ()>(&mut conn),
        )
        .await?;

        debug!(
            channel = %delivery.channel,
            attempt = %next_attempt,
            "Verification request requeued"
        );
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let dlq = dead_letter_channel(&delivery.channel);
        let attempt = delivery.attempt.to_string();
        let failed_at = chrono::Utc::now().to_rfc3339();

        let mut conn = self.writer.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .xadd(
                &dlq,
                "*",
                &[
                    (BODY_FIELD, delivery.body.as_str()),
                    (ATTEMPT_FIELD, attempt.as_str()),
                    ("reason", reason),
                    ("source_id", delivery.id.as_str()),
                    ("failed_at", failed_at.as_str()),
                ],
            )
            .ignore()
            .xack(&delivery.channel, &self.config.group, &[&delivery.id])
            .ignore()
            .xdel(&delivery.channel, &[&delivery.id])
            .ignore();

        with_timeout_of(
            self.config.operation_timeout,
            pipe.query_async::<_, ()>(&mut conn),
        )
        .await?;

        warn!(
            channel = %delivery.channel,
            dlq = %dlq,
            attempt = delivery.attempt,
            reason,
            "Verification request moved to dead-letter stream"
        );
        Ok(())
    }
}
