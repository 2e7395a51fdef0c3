//! Redis-backed set store (`SADD` / `SPOP` / `SCARD`).

use std::fmt;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, instrument};

use super::{QueueError, QueueStore, Result};

/// [`QueueStore`] over a shared Redis server.
///
/// Every queue is a Redis set keyed by the queue name, so any number of
/// crawler processes pointed at the same server share the same work.
#[derive(Clone)]
pub struct RedisQueueStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueStore").finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Connection`] if the URL is invalid or the
    /// server cannot be reached.
    #[instrument]
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::connection(redis_url, e))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::connection(redis_url, e))?;
        debug!("connected to redis queue store");
        Ok(Self { redis })
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let added: i64 = conn.sadd(queue, payload).await?;
        Ok(added > 0)
    }

    async fn dequeue_random(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let payload: Option<String> = conn.spop(queue).await?;
        Ok(payload)
    }

    async fn count(&self, queue: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let size: u64 = conn.scard(queue).await?;
        Ok(size)
    }
}
