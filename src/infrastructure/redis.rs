use super::connection::RedisConnection;
use crate::domain::CacheRepository;
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Cache repository backed by the shared [`RedisConnection`].
///
/// Every failure is reported to the connection and surfaces as a miss (reads)
/// or a dropped write; callers never see Redis errors.
pub struct RedisRepository {
    connection: Arc<RedisConnection>,
}

impl RedisRepository {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self { connection }
    }

    /// Run one command with the operation timeout, recording the outcome.
    async fn run<T, F, Fut>(&self, op: &str, command: F) -> Option<T>
    where
        F: FnOnce(deadpool_redis::Connection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection.connection().await?;
        let timeout = self.connection.policy().operation_timeout;
        match tokio::time::timeout(timeout, command(conn)).await {
            Ok(Ok(value)) => {
                self.connection.record_success();
                Some(value)
            }
            Ok(Err(e)) => {
                self.connection
                    .record_failure(&format!("{} failed: {}", op, e));
                None
            }
            Err(_) => {
                self.connection
                    .record_failure(&format!("{} timed out", op));
                None
            }
        }
    }
}

#[async_trait]
impl CacheRepository for RedisRepository {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .run("GET", |mut conn| async move {
                let value: Option<String> = conn.get(key).await?;
                Ok(value)
            })
            .await
            .flatten();
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let stored = self
            .run("SETEX", |mut conn| async move {
                let _: () = conn.set_ex(key, value, ttl_seconds).await?;
                Ok(())
            })
            .await;
        if stored.is_none() {
            debug!("Dropped cache write for {}", key);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self
            .run("DEL", |mut conn| async move {
                let removed: u64 = conn.del(keys).await?;
                Ok(removed)
            })
            .await
            .unwrap_or(0);
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        // SCAN instead of KEYS so invalidation never blocks the server
        let keys = self
            .run("SCAN", |mut conn| async move {
                let mut iter = conn.scan_match::<_, String>(pattern).await?;
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                // SCAN may return a key more than once
                keys.sort_unstable();
                keys.dedup();
                Ok(keys)
            })
            .await
            .unwrap_or_default();
        Ok(keys)
    }

    async fn is_available(&self) -> bool {
        self.connection.is_configured() && self.connection.is_admissible()
    }
}
