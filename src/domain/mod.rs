//! Domain layer - Core entities and the ports the pipeline depends on.
//!
//! This module defines the domain model of the chart pipeline:
//! - Store entities (tokens, pairs, price/reserve/volume snapshots)
//! - Chart-ready derived values and timeframes
//! - Repository traits for the snapshot store, the cache and pub/sub
//! - Channel names and the cache key namespace

pub mod channels;
pub mod models;
pub mod numeric;

pub use channels::{cache_keys, Channel, ChannelMessage};
pub use models::*;
pub use numeric::RawAmount;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Read/write access to the token, pair and snapshot records.
///
/// The store is an external collaborator treated as ground truth. It is
/// multi-writer (indexer, repair jobs); writes are idempotent upserts keyed
/// by snapshot id, last write wins.
///
/// # Errors
///
/// Every method fails only when the store itself is unreachable or corrupt.
/// Absent records are `Ok(None)` / empty vectors, never errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Look up a token by id or (case-insensitive) address.
    async fn find_token(&self, reference: &str) -> anyhow::Result<Option<Token>>;

    /// Look up a pair by id or (case-insensitive) address.
    async fn find_pair(&self, reference: &str) -> anyhow::Result<Option<Pair>>;

    /// Pairs where the token is token0, ordered by creation time desc, then
    /// reserve0 desc.
    async fn pairs_with_token0(&self, token_id: &str) -> anyhow::Result<Vec<Pair>>;

    /// Pairs where the token is token1, ordered by creation time desc, then
    /// reserve1 desc.
    async fn pairs_with_token1(&self, token_id: &str) -> anyhow::Result<Vec<Pair>>;

    async fn list_pairs(&self) -> anyhow::Result<Vec<Pair>>;

    /// Price snapshots with `timestamp >= since`, ascending by timestamp.
    async fn price_snapshots(&self, pair_id: &str, since: i64)
        -> anyhow::Result<Vec<PriceSnapshot>>;

    /// Reserve snapshots with `from <= timestamp <= to`, ascending.
    async fn reserve_snapshots(
        &self,
        pair_id: &str,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<ReserveSnapshot>>;

    /// The reserve snapshot closest in time, at any distance.
    async fn nearest_reserve_snapshot(
        &self,
        pair_id: &str,
        timestamp: i64,
    ) -> anyhow::Result<Option<ReserveSnapshot>>;

    /// Volume snapshots with `timestamp >= since`, ascending.
    async fn volume_snapshots(&self, pair_id: &str, since: i64)
        -> anyhow::Result<Vec<VolumeSnapshot>>;

    /// Price snapshots to examine during repair, ascending by timestamp.
    ///
    /// Only snapshots missing a price field unless `include_complete`.
    async fn snapshots_for_repair(
        &self,
        pair_id: Option<String>,
        include_complete: bool,
    ) -> anyhow::Result<Vec<PriceSnapshot>>;

    /// Upsert the price fields of one snapshot.
    async fn update_snapshot_prices(
        &self,
        snapshot_id: &str,
        price0: RawAmount,
        price1: RawAmount,
    ) -> anyhow::Result<()>;

    /// Upsert the price fields of many snapshots in a single write.
    ///
    /// Returns the ids that do not exist; every other update was applied.
    async fn update_snapshot_prices_batch(
        &self,
        updates: &[PriceUpdate],
    ) -> anyhow::Result<Vec<String>>;
}

/// Repository trait for caching operations.
///
/// Implementations degrade instead of failing: an unreachable backend reports
/// misses on reads and drops writes.
///
/// # Implementations
///
/// See `infrastructure::redis::RedisRepository` for the Redis implementation
/// and `infrastructure::memory::InMemoryCache` for the in-process one.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Retrieve a cached value by key. `Ok(None)` on miss or expiry.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store a value with a TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64>;

    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Whether the backend currently accepts requests.
    async fn is_available(&self) -> bool;
}

pub type MessageStream = Pin<Box<dyn Stream<Item = ChannelMessage> + Send>>;

/// Cross-process change notifications.
///
/// Delivery is at-most-once per subscriber per publish; there is no replay.
#[async_trait]
pub trait PubSubBroker: Send + Sync {
    async fn publish(&self, channel: Channel, payload: &serde_json::Value) -> anyhow::Result<()>;

    /// Open a live subscription. The stream ends when the underlying
    /// connection drops; callers resubscribe.
    async fn subscribe(&self, channels: &[Channel]) -> anyhow::Result<MessageStream>;
}
