//! Redis Snapshot Backend
//!
//! Snapshot histories are Redis lists, newest entry at the head:
//!
//! - write: `MULTI; LPUSH key value; LTRIM key 0 max-1; EXPIRE key ttl; EXEC`
//! - read: `LRANGE key 0 max-1`
//! - discovery: `SCAN cursor MATCH pattern COUNT n` (never `KEYS`)
//!
//! The connection is a `redis::aio::ConnectionManager`, which multiplexes
//! commands and reconnects on its own. It is opened on first use, so an
//! unreachable server at startup only fails individual calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use crate::application::ports::{BackendError, ScanPage, SnapshotBackend};

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Snapshot backend on a Redis server.
#[derive(Clone)]
pub struct RedisSnapshotBackend {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    connect_timeout: Duration,
}

impl RedisSnapshotBackend {
    /// Prepare a client for `uri` without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid.
    pub fn new(uri: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let client = redis::Client::open(uri)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            connect_timeout,
        })
    }

    /// Shared connection, opened on first use.
    async fn connection(&self) -> Result<ConnectionManager, BackendError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| {
                    BackendError::Transport(format!(
                        "connect timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })??;
                tracing::info!(backend = "redis", "Connected to Redis");
                Ok::<_, BackendError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

fn last_index(max_len: usize) -> isize {
    isize::try_from(max_len).map_or(isize::MAX, |len| len - 1)
}

#[async_trait]
impl SnapshotBackend for RedisSnapshotBackend {
    async fn push_bounded(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);

        redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, last_index(max_len))
            .ignore()
            .expire(key, ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn range(&self, key: &str, max_len: usize) -> Result<Vec<String>, BackendError> {
        if max_len == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.lrange(key, 0, last_index(max_len)).await?;
        Ok(values)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let mut conn = self.connection().await?;
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_index_is_inclusive() {
        assert_eq!(last_index(25), 24);
        assert_eq!(last_index(1), 0);
    }

    #[test]
    fn new_rejects_invalid_uri() {
        let result = RedisSnapshotBackend::new("not-a-redis-uri", Duration::from_secs(1));
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }

    #[tokio::test]
    async fn unreachable_server_fails_calls_not_construction() {
        let backend =
            RedisSnapshotBackend::new("redis://127.0.0.1:1/", Duration::from_millis(500)).unwrap();

        assert!(matches!(backend.ping().await, Err(BackendError::Transport(_))));
        let err = backend
            .push_bounded("market:13:LTP", "{}".to_string(), 25, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
