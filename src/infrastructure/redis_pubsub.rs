use super::connection::RedisConnection;
use crate::domain::{Channel, ChannelMessage, MessageStream, PubSubBroker};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Redis pub/sub broker.
///
/// Publishing borrows a pooled connection; each subscription opens its own
/// dedicated connection so that the pool is never held in subscribe mode.
pub struct RedisPubSub {
    connection: Arc<RedisConnection>,
}

impl RedisPubSub {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self { connection }
    }
}

/// Decode a raw Redis message into a [`ChannelMessage`].
///
/// Unknown channels are dropped. Non-JSON payloads are kept as a string.
pub(crate) fn decode_message(channel: &str, payload: &str) -> Option<ChannelMessage> {
    let channel = channel.parse::<Channel>().ok()?;
    let payload = serde_json::from_str(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));
    Some(ChannelMessage::new(channel, payload))
}

#[async_trait]
impl PubSubBroker for RedisPubSub {
    async fn publish(&self, channel: Channel, payload: &serde_json::Value) -> anyhow::Result<()> {
        let Some(mut conn) = self.connection.connection().await else {
            anyhow::bail!("Redis unavailable, dropping {} notification", channel);
        };
        let body = serde_json::to_string(payload)?;
        let receivers: redis::RedisResult<u64> = conn.publish(channel.as_str(), body).await;
        match receivers {
            Ok(n) => {
                debug!("Published {} to {} subscribers", channel, n);
                Ok(())
            }
            Err(e) => {
                self.connection.record_failure(&e);
                Err(e.into())
            }
        }
    }

    async fn subscribe(&self, channels: &[Channel]) -> anyhow::Result<MessageStream> {
        let mut pubsub = self.connection.open_pubsub().await?;
        for channel in channels {
            if let Err(e) = pubsub.subscribe(channel.as_str()).await {
                self.connection.record_failure(&e);
                return Err(e.into());
            }
        }

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Undecodable pub/sub payload on {}: {}", msg.get_channel_name(), e);
                    return None;
                }
            };
            decode_message(msg.get_channel_name(), &payload)
        });
        Ok(Box::pin(stream))
    }
}
