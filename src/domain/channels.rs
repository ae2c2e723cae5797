//! Pub/sub channel names and cache key namespace.
//!
//! These strings are shared between the API processes and the indexer/repair
//! writers; they must match exactly on both sides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named change-notification topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "metrics:updated")]
    MetricsUpdated,
    #[serde(rename = "pair:updated")]
    PairUpdated,
    #[serde(rename = "token:updated")]
    TokenUpdated,
    #[serde(rename = "transaction:updated")]
    TransactionUpdated,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::MetricsUpdated,
        Channel::PairUpdated,
        Channel::TokenUpdated,
        Channel::TransactionUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::MetricsUpdated => "metrics:updated",
            Channel::PairUpdated => "pair:updated",
            Channel::TokenUpdated => "token:updated",
            Channel::TransactionUpdated => "transaction:updated",
        }
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unknown channel '{}'", s))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification as received from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: Channel,
    pub payload: serde_json::Value,
}

impl ChannelMessage {
    pub fn new(channel: Channel, payload: serde_json::Value) -> Self {
        Self { channel, payload }
    }

    /// String field of the payload, e.g. the entity `id`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(|v| v.as_str())
    }
}

/// Cache key builders.
///
/// Layout: `<entity>:<id>:<field>` for per-entity values, `protocol:<metric>`
/// for protocol-wide values and `tokens:*` for list-level caches.
pub mod cache_keys {
    use crate::domain::Timeframe;

    pub const PROTOCOL_TVL: &str = "protocol:totalValueLockedUSD";
    pub const PROTOCOL_DAILY_VOLUME: &str = "protocol:dailyVolumeUSD";
    pub const PROTOCOL_VOLUME_CHANGE: &str = "protocol:volume24hChange";
    pub const PROTOCOL_SCOPE: &str = "protocol:*";
    pub const TOKEN_LISTS_SCOPE: &str = "tokens:*";

    pub fn token_price_usd(token_id: &str) -> String {
        format!("token:{}:priceUSD", token_id)
    }

    pub fn pair_reserve_usd(pair_id: &str) -> String {
        format!("pair:{}:reserveUSD", pair_id)
    }

    pub fn token_chart(token_id: &str, timeframe: Timeframe, limit: usize) -> String {
        format!("token:{}:chart:{}:{}", token_id, timeframe.as_str(), limit)
    }

    pub fn pair_chart(pair_id: &str, timeframe: Timeframe, limit: usize) -> String {
        format!("pair:{}:chart:{}:{}", pair_id, timeframe.as_str(), limit)
    }

    pub fn pair_volume(pair_id: &str, timeframe: Timeframe, limit: usize) -> String {
        format!("pair:{}:volume:{}:{}", pair_id, timeframe.as_str(), limit)
    }

    pub fn token_scope(token_id: &str) -> String {
        format!("token:{}:*", token_id)
    }

    pub fn token_chart_scope(token_id: &str) -> String {
        format!("token:{}:chart:*", token_id)
    }

    pub fn pair_scope(pair_id: &str) -> String {
        format!("pair:{}:*", pair_id)
    }

    pub fn pair_volume_scope(pair_id: &str) -> String {
        format!("pair:{}:volume:*", pair_id)
    }

    /// Namespace segment of a key (`token`, `pair`, `protocol`, ...).
    pub fn namespace(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }
}
