use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::KeyValueCache;
use crate::error::Result;

/// [`KeyValueCache`] over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    operation_timeout: Duration,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, operation_timeout: Duration) -> Self {
        Self {
            conn,
            operation_timeout,
        }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_utils::with_timeout_of(self.operation_timeout, async {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis_utils::with_timeout_of(self.operation_timeout, async {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis_utils::with_timeout_of(self.operation_timeout, async {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis_utils::with_timeout_of(self.operation_timeout, async {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await?;
        Ok(exists)
    }
}
