//! In-process cache and broker used when Redis is not configured, and as
//! test doubles.

use crate::domain::{CacheRepository, Channel, ChannelMessage, MessageStream, PubSubBroker};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// TTL-aware key/value map.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Redis-style glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[async_trait]
impl CacheRepository for InMemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.expires_at > now)
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.expires_at > now && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Single-process broker over a tokio broadcast channel.
pub struct InMemoryPubSub {
    sender: broadcast::Sender<ChannelMessage>,
}

impl InMemoryPubSub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl PubSubBroker for InMemoryPubSub {
    async fn publish(&self, channel: Channel, payload: &serde_json::Value) -> anyhow::Result<()> {
        // No subscribers is not an error
        let _ = self
            .sender
            .send(ChannelMessage::new(channel, payload.clone()));
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> anyhow::Result<MessageStream> {
        let wanted = channels.to_vec();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let keep = match item {
                Ok(msg) if wanted.contains(&msg.channel) => Some(msg),
                _ => None,
            };
            async move { keep }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("token:t1:*", "token:t1:priceUSD"));
        assert!(glob_match("token:t1:*", "token:t1:chart:1d:100"));
        assert!(!glob_match("token:t1:*", "token:t10"));
        assert!(glob_match("pair:?:volume:*", "pair:a:volume:1d:24"));
        assert!(!glob_match("pair:?:volume:*", "pair:ab:volume:1d:24"));
        assert!(glob_match("*", ""));
        assert!(glob_match("protocol:*", "protocol:"));
        assert!(!glob_match("protocol", "protocol:x"));
    }

    #[tokio::test]
    async fn test_cache_ttl_and_pattern_delete() {
        let cache = InMemoryCache::new();
        cache.set("token:t1:priceUSD", "1.5", 60).await.unwrap();
        cache.set("token:t1:chart:1d:100", "[]", 60).await.unwrap();
        cache.set("token:t2:priceUSD", "3", 60).await.unwrap();
        cache.set("expired", "x", 0).await.unwrap();

        assert_eq!(cache.get("token:t1:priceUSD").await.unwrap().as_deref(), Some("1.5"));
        assert!(cache.get("expired").await.unwrap().is_none());

        let keys = cache.keys("token:t1:*").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(cache.delete(&keys).await.unwrap(), 2);
        assert!(cache.get("token:t1:priceUSD").await.unwrap().is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_pubsub_filters_channels() {
        let broker = InMemoryPubSub::new(16);
        let mut stream = broker.subscribe(&[Channel::PairUpdated]).await.unwrap();

        broker
            .publish(Channel::TokenUpdated, &json!({"id": "t1"}))
            .await
            .unwrap();
        broker
            .publish(Channel::PairUpdated, &json!({"id": "p1"}))
            .await
            .unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.channel, Channel::PairUpdated);
        assert_eq!(msg.field("id"), Some("p1"));
    }
}
