//! Per-task failure counting.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use imgtier_models::ImageId;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::QueueResult;

/// Counts processing failures per task across redeliveries.
#[async_trait]
pub trait AttemptTracker: Send + Sync {
    /// Record one failure and return the total so far.
    async fn record_failure(&self, id: &ImageId) -> QueueResult<u32>;

    /// Forget the count for `id`.
    async fn clear(&self, id: &ImageId) -> QueueResult<()>;
}

/// Tracker local to one process.
#[derive(Debug, Default)]
pub struct MemoryAttemptTracker {
    counts: Mutex<HashMap<ImageId, u32>>,
}

impl MemoryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, id: &ImageId) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AttemptTracker for MemoryAttemptTracker {
    async fn record_failure(&self, id: &ImageId) -> QueueResult<u32> {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = counts.entry(id.clone()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear(&self, id: &ImageId) -> QueueResult<()> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        Ok(())
    }
}

/// Tracker shared by every worker through Redis counters.
pub struct RedisAttemptTracker {
    client: redis::Client,
    key_prefix: String,
    ttl_secs: i64,
}

impl RedisAttemptTracker {
    /// Counters expire after a day without failures.
    pub const DEFAULT_TTL_SECS: i64 = 86400;

    pub fn new(redis_url: &str) -> QueueResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            key_prefix: "imgtier:attempts".to_string(),
            ttl_secs: Self::DEFAULT_TTL_SECS,
        })
    }

    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn key(&self, id: &ImageId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }
}

#[async_trait]
impl AttemptTracker for RedisAttemptTracker {
    async fn record_failure(&self, id: &ImageId) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = self.key(id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, self.ttl_secs).await?;
        debug!(task_id = %id, attempts = count, "Recorded task failure");
        Ok(count)
    }

    async fn clear(&self, id: &ImageId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_tracker_counts_and_clears() {
        let tracker = MemoryAttemptTracker::new();
        let id = ImageId::from("a1b2");
        let other = ImageId::from("c3d4");

        assert_eq!(tracker.record_failure(&id).await.unwrap(), 1);
        assert_eq!(tracker.record_failure(&id).await.unwrap(), 2);
        assert_eq!(tracker.record_failure(&other).await.unwrap(), 1);

        tracker.clear(&id).await.unwrap();
        assert_eq!(tracker.count(&id), 0);
        assert_eq!(tracker.count(&other), 1);
        assert_eq!(tracker.record_failure(&id).await.unwrap(), 1);
    }

    #[test]
    fn test_redis_key_layout() {
        let tracker = RedisAttemptTracker::new("redis://localhost:6379").unwrap();
        assert_eq!(tracker.key(&ImageId::from("a1b2")), "imgtier:attempts:a1b2");
    }
}
