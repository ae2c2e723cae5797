//! Chart series builder.
//!
//! Turns price/volume snapshots into bucketed, chart-ready series and derives
//! the protocol headline metrics. Results are cached through
//! [`CacheService`]; series built while the store is unreachable are returned
//! with an `unavailable` status and never cached.

use super::cache_service::{ttl, CacheService};
use super::pair_locator::PairLocator;
use super::price_reconstructor::{reserve_prices, scale_raw_amount, to_usd_price};
use super::reserve_lookup::nearest_reserve;
use crate::domain::{
    cache_keys, ChartPoint, ChartSeries, ChartSubject, Pair, PriceSource, ProtocolMetrics,
    RawAmount, SeriesStatus, SnapshotStore, Timeframe, Token, VolumePoint, VolumeSeries,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Upper bound on points returned by one series.
pub const MAX_CHART_POINTS: usize = 1000;

const DAY_SECS: i64 = 86_400;

/// Source of "now" in epoch seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct ChartService {
    store: Arc<dyn SnapshotStore>,
    locator: PairLocator,
    cache: Arc<CacheService>,
    reserve_tolerance_secs: i64,
    clock: Clock,
}

impl ChartService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        locator: PairLocator,
        cache: Arc<CacheService>,
        reserve_tolerance_secs: i64,
    ) -> Self {
        Self {
            store,
            locator,
            cache,
            reserve_tolerance_secs,
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Replace the wall clock (tests, replays).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Price series for a token (located pair, USD) or a pair (token0 in
    /// token1 units).
    pub async fn get_price_chart_data(
        &self,
        subject: &ChartSubject,
        timeframe: Timeframe,
        limit: usize,
    ) -> ChartSeries {
        let started = Instant::now();
        let limit = limit.min(MAX_CHART_POINTS);
        let result = match subject {
            ChartSubject::Token(reference) => self.token_chart(reference, timeframe, limit).await,
            ChartSubject::Pair(reference) => self.pair_chart(reference, timeframe, limit).await,
        };

        let series = match result {
            Ok(series) => series,
            Err(e) => {
                error!(
                    "Snapshot store failure building {} chart for {}: {:#}",
                    subject.kind(),
                    subject.reference(),
                    e
                );
                ChartSeries::unavailable()
            }
        };

        metrics::counter!(
            "chart_requests_total",
            "kind" => subject.kind(),
            "status" => status_label(series.status)
        )
        .increment(1);
        metrics::histogram!("chart_build_duration_seconds", "kind" => subject.kind())
            .record(started.elapsed().as_secs_f64());
        series
    }

    async fn token_chart(
        &self,
        reference: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<ChartSeries> {
        let Some(token) = self.store.find_token(reference).await? else {
            info!("Token {} not found", reference);
            return Ok(ChartSeries::no_data());
        };

        let key = cache_keys::token_chart(&token.id, timeframe, limit);
        if let Some(cached) = self.cache.get_json::<ChartSeries>(&key).await {
            return Ok(cached);
        }

        let Some((token, pair, source)) = self
            .locator
            .find_best_price_data_pair(&token.id, &token.address)
            .await?
        else {
            return Ok(ChartSeries::no_data());
        };

        let counterpart = pair.counterpart(source.is_token0);
        let counterpart_usd = self.token_price_usd(counterpart).await;
        let points = self
            .price_points(&pair, &token, &source, counterpart_usd, timeframe, limit)
            .await?;

        let series = ChartSeries::ready(source, points);
        self.cache.put_json(&key, &series, ttl::CHART_SECS).await;
        Ok(series)
    }

    async fn pair_chart(
        &self,
        reference: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<ChartSeries> {
        let Some(pair) = self.store.find_pair(reference).await? else {
            info!("Pair {} not found", reference);
            return Ok(ChartSeries::no_data());
        };

        let key = cache_keys::pair_chart(&pair.id, timeframe, limit);
        if let Some(cached) = self.cache.get_json::<ChartSeries>(&key).await {
            return Ok(cached);
        }

        let source = PriceSource {
            pair_id: pair.id.clone(),
            is_token0: true,
        };
        let token = pair.token0.clone();
        let points = self
            .price_points(&pair, &token, &source, Some(1.0), timeframe, limit)
            .await?;

        let series = ChartSeries::ready(source, points);
        self.cache.put_json(&key, &series, ttl::CHART_SECS).await;
        Ok(series)
    }

    /// Reconstruct, bucket and truncate the points of one pair side.
    async fn price_points(
        &self,
        pair: &Pair,
        token: &Token,
        source: &PriceSource,
        counterpart_usd: Option<f64>,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<Vec<ChartPoint>> {
        let counterpart = pair.counterpart(source.is_token0);
        if counterpart_usd.is_none() {
            error!(
                "No USD price for {} (counterpart of {} in pair {}), chart is empty",
                counterpart.symbol, token.symbol, pair.id
            );
            return Ok(Vec::new());
        }

        let since = timeframe.since(self.now());
        let snapshots = self.store.price_snapshots(&pair.id, since).await?;
        let mut points = Vec::with_capacity(snapshots.len());

        for snapshot in &snapshots {
            let raw = match snapshot.raw_rate(source.is_token0) {
                Some(raw) => raw.clone(),
                None => match self
                    .synthesize_rate(&pair.id, snapshot.timestamp, source.is_token0)
                    .await?
                {
                    Some(raw) => raw,
                    None => {
                        debug!(
                            "No price or reserve data for snapshot {} of pair {}",
                            snapshot.id, pair.id
                        );
                        continue;
                    }
                },
            };

            let price = to_usd_price(
                &raw,
                source.is_token0,
                token.decimals,
                counterpart.decimals,
                counterpart_usd,
            );
            // Zero and unknown prices are gaps, not data points
            if let Some(value) = price.chartable() {
                points.push(ChartPoint {
                    time: snapshot.timestamp,
                    value,
                });
            }
        }

        Ok(downsample(points, timeframe.bucket_secs(), limit))
    }

    /// Raw rate for one side rebuilt from the nearest reserve snapshot.
    async fn synthesize_rate(
        &self,
        pair_id: &str,
        timestamp: i64,
        is_token0: bool,
    ) -> anyhow::Result<Option<RawAmount>> {
        let Some(reserves) = nearest_reserve(
            self.store.as_ref(),
            pair_id,
            timestamp,
            self.reserve_tolerance_secs,
        )
        .await?
        else {
            return Ok(None);
        };
        let (price0, price1) = reserve_prices(&reserves.reserve0, &reserves.reserve1);
        Ok(Some(if is_token0 { price0 } else { price1 }))
    }

    /// Bucketed traded volume of a pair.
    pub async fn get_volume_chart_data(
        &self,
        pair_reference: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> VolumeSeries {
        let limit = limit.min(MAX_CHART_POINTS);
        let series = match self.volume_chart(pair_reference, timeframe, limit).await {
            Ok(series) => series,
            Err(e) => {
                error!(
                    "Snapshot store failure building volume chart for {}: {:#}",
                    pair_reference, e
                );
                VolumeSeries::unavailable()
            }
        };
        metrics::counter!(
            "chart_requests_total",
            "kind" => "volume",
            "status" => status_label(series.status)
        )
        .increment(1);
        series
    }

    async fn volume_chart(
        &self,
        reference: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> anyhow::Result<VolumeSeries> {
        let Some(pair) = self.store.find_pair(reference).await? else {
            info!("Pair {} not found", reference);
            return Ok(VolumeSeries::no_data());
        };

        let key = cache_keys::pair_volume(&pair.id, timeframe, limit);
        if let Some(cached) = self.cache.get_json::<VolumeSeries>(&key).await {
            return Ok(cached);
        }

        let since = timeframe.since(self.now());
        let snapshots = self.store.volume_snapshots(&pair.id, since).await?;
        let price0 = self.token_price_usd(&pair.token0).await;
        let price1 = self.token_price_usd(&pair.token1).await;
        let bucket = timeframe.bucket_secs();

        let mut buckets: BTreeMap<i64, VolumePoint> = BTreeMap::new();
        for snapshot in &snapshots {
            let volume0 = scale_raw_amount(&snapshot.volume0, pair.token0.decimals).unwrap_or(0.0);
            let volume1 = scale_raw_amount(&snapshot.volume1, pair.token1.decimals).unwrap_or(0.0);
            let start = bucket_start(snapshot.timestamp, bucket);
            let point = buckets.entry(start).or_insert(VolumePoint {
                time: start,
                value: 0.0,
                volume0: 0.0,
                volume1: 0.0,
                count: 0,
            });
            point.volume0 += volume0;
            point.volume1 += volume1;
            point.count += snapshot.tx_count;
        }

        let mut points: Vec<VolumePoint> = buckets
            .into_values()
            .map(|mut point| {
                point.value = usd_volume(point.volume0, point.volume1, price0, price1);
                point
            })
            .collect();
        keep_most_recent(&mut points, limit);

        let series = VolumeSeries::ready(points);
        self.cache.put_json(&key, &series, ttl::CHART_SECS).await;
        Ok(series)
    }

    /// Protocol TVL, last-24h volume and its change versus the 24h before.
    pub async fn get_protocol_metrics(&self) -> anyhow::Result<ProtocolMetrics> {
        let total_value_locked_usd = self
            .cache
            .get_or_compute(cache_keys::PROTOCOL_TVL, ttl::PROTOCOL_SECS, || {
                self.total_value_locked()
            })
            .await?;

        let cached_volume = self.cache.get_json::<f64>(cache_keys::PROTOCOL_DAILY_VOLUME).await;
        let cached_change = self.cache.get_json::<f64>(cache_keys::PROTOCOL_VOLUME_CHANGE).await;
        let (daily_volume_usd, volume_24h_change) = match (cached_volume, cached_change) {
            (Some(volume), Some(change)) => (volume, change),
            _ => {
                let (current, previous) = self.volume_windows().await?;
                let change = percent_change(current, previous);
                self.cache
                    .put_json(cache_keys::PROTOCOL_DAILY_VOLUME, &current, ttl::PROTOCOL_SECS)
                    .await;
                self.cache
                    .put_json(cache_keys::PROTOCOL_VOLUME_CHANGE, &change, ttl::PROTOCOL_SECS)
                    .await;
                (current, change)
            }
        };

        Ok(ProtocolMetrics {
            total_value_locked_usd,
            daily_volume_usd,
            volume_24h_change,
        })
    }

    async fn total_value_locked(&self) -> anyhow::Result<f64> {
        let pairs = self.store.list_pairs().await?;
        let mut total = 0.0;
        for pair in &pairs {
            total += self.pair_reserve_usd(pair).await;
        }
        Ok(total)
    }

    /// USD volume of (last 24h, 24h before that) across all pairs.
    async fn volume_windows(&self) -> anyhow::Result<(f64, f64)> {
        let now = self.now();
        let current_start = now - DAY_SECS;
        let previous_start = now - 2 * DAY_SECS;

        let mut current = 0.0;
        let mut previous = 0.0;
        for pair in self.store.list_pairs().await? {
            let snapshots = self.store.volume_snapshots(&pair.id, previous_start).await?;
            if snapshots.is_empty() {
                continue;
            }
            let price0 = self.token_price_usd(&pair.token0).await;
            let price1 = self.token_price_usd(&pair.token1).await;
            for snapshot in snapshots.iter().filter(|s| s.timestamp <= now) {
                let volume0 = scale_raw_amount(&snapshot.volume0, pair.token0.decimals).unwrap_or(0.0);
                let volume1 = scale_raw_amount(&snapshot.volume1, pair.token1.decimals).unwrap_or(0.0);
                let usd = usd_volume(volume0, volume1, price0, price1);
                if snapshot.timestamp >= current_start {
                    current += usd;
                } else {
                    previous += usd;
                }
            }
        }
        Ok((current, previous))
    }

    /// USD price of a token, read through `token:<id>:priceUSD`.
    ///
    /// Uses the indexed price; stablecoins without one count as 1.0.
    pub async fn token_price_usd(&self, token: &Token) -> Option<f64> {
        let key = cache_keys::token_price_usd(&token.id);
        if let Some(cached) = self.cache.get_json::<Option<f64>>(&key).await {
            return cached;
        }

        let price = token
            .price_usd
            .filter(|p| p.is_finite() && *p > 0.0)
            .or_else(|| self.locator.classifier().is_stablecoin(token).then_some(1.0));
        if price.is_none() {
            warn!("No USD price for token {} ({})", token.symbol, token.id);
        }
        self.cache.put_json(&key, &price, ttl::PRICE_SECS).await;
        price
    }

    /// USD value of a pair's reserves, read through `pair:<id>:reserveUSD`.
    pub async fn pair_reserve_usd(&self, pair: &Pair) -> f64 {
        let key = cache_keys::pair_reserve_usd(&pair.id);
        if let Some(cached) = self.cache.get_json::<f64>(&key).await {
            return cached;
        }

        let reserve0 = scale_raw_amount(&pair.reserve0, pair.token0.decimals).unwrap_or(0.0);
        let reserve1 = scale_raw_amount(&pair.reserve1, pair.token1.decimals).unwrap_or(0.0);
        let price0 = self.token_price_usd(&pair.token0).await;
        let price1 = self.token_price_usd(&pair.token1).await;

        // One priced side stands in for both halves of the pool
        let value = match (price0, price1) {
            (Some(p0), Some(p1)) => reserve0 * p0 + reserve1 * p1,
            (Some(p0), None) => 2.0 * reserve0 * p0,
            (None, Some(p1)) => 2.0 * reserve1 * p1,
            (None, None) => 0.0,
        };
        self.cache.put_json(&key, &value, ttl::RESERVE_SECS).await;
        value
    }
}

fn status_label(status: SeriesStatus) -> &'static str {
    match status {
        SeriesStatus::Ready => "ready",
        SeriesStatus::NoData => "no_data",
        SeriesStatus::Unavailable => "unavailable",
    }
}

fn bucket_start(time: i64, bucket_secs: i64) -> i64 {
    if bucket_secs <= 0 {
        return time;
    }
    time - time.rem_euclid(bucket_secs)
}

fn keep_most_recent<T>(points: &mut Vec<T>, limit: usize) {
    if points.len() > limit {
        points.drain(..points.len() - limit);
    }
}

/// Align points to bucket starts, keeping the last point per bucket, in
/// ascending time order, truncated to the `limit` most recent.
pub fn downsample(points: Vec<ChartPoint>, bucket_secs: i64, limit: usize) -> Vec<ChartPoint> {
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for point in points {
        buckets.insert(bucket_start(point.time, bucket_secs), point.value);
    }
    let mut series: Vec<ChartPoint> = buckets
        .into_iter()
        .map(|(time, value)| ChartPoint { time, value })
        .collect();
    keep_most_recent(&mut series, limit);
    series
}

/// USD value of a traded amount pair: both sides averaged when both are
/// priced, otherwise whichever side is.
pub fn usd_volume(volume0: f64, volume1: f64, price0: Option<f64>, price1: Option<f64>) -> f64 {
    match (price0, price1) {
        (Some(p0), Some(p1)) => (volume0 * p0 + volume1 * p1) / 2.0,
        (Some(p0), None) => volume0 * p0,
        (None, Some(p1)) => volume1 * p1,
        (None, None) => 0.0,
    }
}

fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}
