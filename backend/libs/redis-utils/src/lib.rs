use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, ErrorKind, IntoConnectionInfo, RedisError};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Redis connection pool.
///
/// `ConnectionManager` multiplexes every command over one socket and reconnects on
/// its own, so clones are cheap and safe to hand to concurrent tasks.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    manager: ConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let connection_info: ConnectionInfo = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;

        let tls = matches!(connection_info.addr, ConnectionAddr::TcpTls { .. });

        let client =
            Client::open(connection_info).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("failed to initialize Redis connection manager")?;

        info!(tls, "Redis connection manager initialized");

        Ok(Self { client, manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Open a manager that does not share a socket with [`RedisPool::manager`].
    ///
    /// Blocking reads (`XREADGROUP ... BLOCK`) hold the socket until they return, so
    /// they need their own connection or they stall every other command behind them.
    pub async fn dedicated_manager(&self) -> Result<ConnectionManager> {
        ConnectionManager::new(self.client.clone())
            .await
            .context("failed to open dedicated Redis connection")
    }
}

/// Run a Redis command, turning an elapsed deadline into an `IoError` so callers
/// handle it like any other connectivity failure.
pub async fn with_timeout_of<F, T>(duration: Duration, future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RedisError::from((
            ErrorKind::IoError,
            "redis operation timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout_of(Duration::from_millis(200), async {
            Ok::<_, RedisError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed_is_io_error() {
        let result = with_timeout_of(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, RedisError>(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_command_error() {
        let result = with_timeout_of(Duration::from_millis(200), async {
            Err::<(), _>(RedisError::from((ErrorKind::TypeError, "bad reply")))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeError);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisPool::connect("not a redis url").await;
        assert!(result.is_err());
    }
}
