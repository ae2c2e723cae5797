//! Change-notification fan-in and fan-out.
//!
//! One background subscription per process receives every channel from the
//! broker, evicts the cache keys the change affects, then relays the message
//! to live client streams over a tokio broadcast channel. Delivery is
//! at-most-once; lagging client streams skip messages.

use super::cache_service::CacheService;
use crate::domain::{cache_keys, Channel, ChannelMessage, PubSubBroker};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, info, warn};

const RESUBSCRIBE_BASE_MS: u64 = 250;
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Cache key patterns to evict for a change notification.
pub fn invalidation_patterns(message: &ChannelMessage) -> Vec<String> {
    match message.channel {
        Channel::TokenUpdated => {
            let mut patterns = Vec::with_capacity(2);
            if let Some(id) = message.field("id") {
                patterns.push(cache_keys::token_scope(id));
            }
            patterns.push(cache_keys::TOKEN_LISTS_SCOPE.to_string());
            patterns
        }
        Channel::PairUpdated => {
            let mut patterns = Vec::with_capacity(4);
            if let Some(id) = message.field("id") {
                patterns.push(cache_keys::pair_scope(id));
            }
            // Token charts read their prices from a pair of that token
            for side in ["token0", "token1"] {
                if let Some(token_id) = message.field(side) {
                    patterns.push(cache_keys::token_chart_scope(token_id));
                }
            }
            patterns.push(cache_keys::PROTOCOL_SCOPE.to_string());
            patterns
        }
        Channel::TransactionUpdated => {
            let mut patterns = Vec::with_capacity(2);
            if let Some(pair_id) = message.field("pairId") {
                patterns.push(cache_keys::pair_volume_scope(pair_id));
            }
            patterns.push(cache_keys::PROTOCOL_SCOPE.to_string());
            patterns
        }
        Channel::MetricsUpdated => vec![cache_keys::PROTOCOL_SCOPE.to_string()],
    }
}

pub struct EventHub {
    broker: Arc<dyn PubSubBroker>,
    cache: Arc<CacheService>,
    sender: broadcast::Sender<ChannelMessage>,
}

impl EventHub {
    pub fn new(broker: Arc<dyn PubSubBroker>, cache: Arc<CacheService>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            broker,
            cache,
            sender,
        }
    }

    /// Live feed of every message this process receives.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a change notification to every process.
    pub async fn publish(&self, channel: Channel, payload: &serde_json::Value) -> anyhow::Result<()> {
        self.broker.publish(channel, payload).await?;
        metrics::counter!("events_published_total", "channel" => channel.as_str()).increment(1);
        Ok(())
    }

    /// Evict affected keys, then relay to client streams.
    ///
    /// Returns the number of evicted cache entries.
    pub async fn handle_message(&self, message: ChannelMessage) -> u64 {
        metrics::counter!("events_received_total", "channel" => message.channel.as_str())
            .increment(1);

        let mut evicted = 0;
        for pattern in invalidation_patterns(&message) {
            evicted += self.cache.invalidate(&pattern).await;
        }
        debug!(
            "Handled {} notification, evicted {} cache entries",
            message.channel, evicted
        );

        // No live clients is fine
        let _ = self.sender.send(message);
        evicted
    }

    /// Run the process-wide subscription until the task is aborted,
    /// resubscribing with jittered exponential backoff whenever the broker
    /// connection drops.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut delays = reconnect_delays();
            loop {
                match self.broker.subscribe(&Channel::ALL).await {
                    Ok(mut stream) => {
                        info!("Subscribed to change notifications");
                        delays = reconnect_delays();
                        while let Some(message) = stream.next().await {
                            self.handle_message(message).await;
                        }
                        warn!("Change notification stream ended, resubscribing");
                    }
                    Err(e) => {
                        warn!("Failed to subscribe to change notifications: {:#}", e);
                    }
                }
                let delay = delays.next().unwrap_or(RESUBSCRIBE_MAX);
                tokio::time::sleep(delay).await;
            }
        })
    }
}

fn reconnect_delays() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(RESUBSCRIBE_BASE_MS / 2)
        .max_delay(RESUBSCRIBE_MAX)
        .map(jitter)
}
