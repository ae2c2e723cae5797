//! Entities read from the snapshot store and the chart-ready values derived
//! from them.

use super::numeric::{block_number, epoch_seconds, RawAmount};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

// ============================================================================
// Store entities
// ============================================================================

/// A fungible token tracked by the DEX.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    /// Contract address; matched case-insensitively.
    pub address: String,
    pub symbol: String,
    /// Authoritative scaling for every raw value tied to this token.
    pub decimals: u32,
    /// Latest indexed USD price, when the indexer has one.
    #[serde(default, rename = "priceUSD")]
    pub price_usd: Option<f64>,
}

impl Token {
    pub fn matches(&self, reference: &str) -> bool {
        self.id == reference || self.address.eq_ignore_ascii_case(reference)
    }
}

/// A trading pair with both tokens resolved.
///
/// `token0`/`token1` ordering is fixed at creation. `price0` on a snapshot is
/// token1 per token0, `price1` is token0 per token1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub id: String,
    pub address: String,
    pub token0: Token,
    pub token1: Token,
    pub reserve0: RawAmount,
    pub reserve1: RawAmount,
    #[serde(deserialize_with = "epoch_seconds")]
    pub created_at: i64,
}

impl Pair {
    pub fn matches(&self, reference: &str) -> bool {
        self.id == reference || self.address.eq_ignore_ascii_case(reference)
    }

    /// The token on the requested side.
    pub fn side(&self, is_token0: bool) -> &Token {
        if is_token0 {
            &self.token0
        } else {
            &self.token1
        }
    }

    /// The token on the opposite side.
    pub fn counterpart(&self, is_token0: bool) -> &Token {
        self.side(!is_token0)
    }

    /// Reserve held on the requested side.
    pub fn reserve(&self, is_token0: bool) -> &RawAmount {
        if is_token0 {
            &self.reserve0
        } else {
            &self.reserve1
        }
    }
}

/// Time-ordered raw exchange rates for a pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub id: String,
    pub pair_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
    #[serde(deserialize_with = "block_number")]
    pub block_number: u64,
    /// token1 per token0, undivided. Null while indexing lags.
    #[serde(default)]
    pub price0: Option<RawAmount>,
    /// token0 per token1, undivided. Null while indexing lags.
    #[serde(default)]
    pub price1: Option<RawAmount>,
}

/// Corrected price fields for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub snapshot_id: String,
    pub price0: RawAmount,
    pub price1: RawAmount,
}

impl PriceSnapshot {
    /// The rate describing the requested side of the pair.
    pub fn raw_rate(&self, is_token0: bool) -> Option<&RawAmount> {
        if is_token0 {
            self.price0.as_ref()
        } else {
            self.price1.as_ref()
        }
    }

    pub fn has_prices(&self) -> bool {
        self.price0.is_some() && self.price1.is_some()
    }
}

/// Reserve levels of a pair at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReserveSnapshot {
    pub id: String,
    pub pair_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
    #[serde(deserialize_with = "block_number")]
    pub block_number: u64,
    pub reserve0: RawAmount,
    pub reserve1: RawAmount,
}

/// Raw traded amounts of a pair over one indexing interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    pub pair_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
    pub volume0: RawAmount,
    pub volume1: RawAmount,
    #[serde(default)]
    pub tx_count: u64,
}

// ============================================================================
// Derived values
// ============================================================================

/// The pair chosen to source a token's price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceSource {
    pub pair_id: String,
    pub is_token0: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ChartPoint {
    /// Unix timestamp (seconds), aligned to the timeframe bucket
    pub time: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct VolumePoint {
    /// Unix timestamp (seconds), aligned to the timeframe bucket
    pub time: i64,
    /// Volume in USD
    pub value: f64,
    /// token0 volume, decimal-scaled
    pub volume0: f64,
    /// token1 volume, decimal-scaled
    pub volume1: f64,
    /// Number of swaps
    pub count: u64,
}

/// Protocol-wide headline metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ProtocolMetrics {
    #[serde(rename = "totalValueLockedUSD")]
    pub total_value_locked_usd: f64,
    #[serde(rename = "dailyVolumeUSD")]
    pub daily_volume_usd: f64,
    /// Percentage change of the last 24h volume versus the 24h before
    #[serde(rename = "volume24hChange")]
    pub volume_24h_change: f64,
}

/// Whether a series could be built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    /// Series computed (possibly sparse)
    Ready,
    /// Token/pair unknown or without pairs; nothing to chart
    NoData,
    /// Snapshot store unreachable
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ChartSeries {
    pub status: SeriesStatus,
    #[serde(default)]
    pub source: Option<PriceSource>,
    pub points: Vec<ChartPoint>,
}

impl ChartSeries {
    pub fn ready(source: PriceSource, points: Vec<ChartPoint>) -> Self {
        Self {
            status: SeriesStatus::Ready,
            source: Some(source),
            points,
        }
    }

    pub fn no_data() -> Self {
        Self {
            status: SeriesStatus::NoData,
            source: None,
            points: Vec::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: SeriesStatus::Unavailable,
            source: None,
            points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct VolumeSeries {
    pub status: SeriesStatus,
    pub points: Vec<VolumePoint>,
}

impl VolumeSeries {
    pub fn ready(points: Vec<VolumePoint>) -> Self {
        Self {
            status: SeriesStatus::Ready,
            points,
        }
    }

    pub fn no_data() -> Self {
        Self {
            status: SeriesStatus::NoData,
            points: Vec::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: SeriesStatus::Unavailable,
            points: Vec::new(),
        }
    }
}

/// What a price chart is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSubject {
    /// Token id or address; the pair is located automatically
    Token(String),
    /// Pair id or address; charts token0 priced in token1
    Pair(String),
}

impl ChartSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            ChartSubject::Token(_) => "token",
            ChartSubject::Pair(_) => "pair",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            ChartSubject::Token(r) | ChartSubject::Pair(r) => r,
        }
    }
}

// ============================================================================
// Timeframes
// ============================================================================

/// Chart lookback window and bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Hour,
        Timeframe::Day,
        Timeframe::Week,
        Timeframe::Month,
        Timeframe::Year,
        Timeframe::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Hour => "1h",
            Timeframe::Day => "1d",
            Timeframe::Week => "1w",
            Timeframe::Month => "1m",
            Timeframe::Year => "1y",
            Timeframe::All => "all",
        }
    }

    /// Lookback window in seconds; `None` means full history.
    pub fn window_secs(&self) -> Option<i64> {
        match self {
            Timeframe::Hour => Some(3_600),
            Timeframe::Day => Some(86_400),
            Timeframe::Week => Some(604_800),
            Timeframe::Month => Some(2_592_000),
            Timeframe::Year => Some(31_536_000),
            Timeframe::All => None,
        }
    }

    pub fn bucket_secs(&self) -> i64 {
        match self {
            Timeframe::Hour => 60,
            Timeframe::Day => 300,
            Timeframe::Week => 3_600,
            Timeframe::Month => 14_400,
            Timeframe::Year | Timeframe::All => 86_400,
        }
    }

    /// Earliest timestamp included when the chart is built at `now`.
    pub fn since(&self, now: i64) -> i64 {
        self.window_secs().map(|w| now - w).unwrap_or(0)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" | "hour" => Ok(Timeframe::Hour),
            "1d" | "24h" | "day" => Ok(Timeframe::Day),
            "1w" | "7d" | "week" => Ok(Timeframe::Week),
            "1m" | "30d" | "month" => Ok(Timeframe::Month),
            "1y" | "365d" | "year" => Ok(Timeframe::Year),
            "all" | "max" => Ok(Timeframe::All),
            other => anyhow::bail!(
                "Unsupported timeframe '{}' (expected one of 1h, 1d, 1w, 1m, 1y, all)",
                other
            ),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
