//! Backfill of missing snapshot prices from reserve history.

use super::price_reconstructor::reserve_prices;
use super::reserve_lookup::nearest_reserve;
use crate::domain::{Channel, PriceUpdate, PubSubBroker, SnapshotStore};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Corrections written to the store per call.
const WRITE_BATCH_SIZE: usize = 500;

/// Which snapshots a repair run examines.
#[derive(Debug, Clone, Default)]
pub struct RepairScope {
    /// Pair id or address; all pairs when absent
    pub pair: Option<String>,
    /// Recompute every snapshot, not only those with null prices
    pub full: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: u64,
    pub repaired: u64,
    pub unchanged: u64,
    pub skipped_no_reserves: u64,
    pub failed: u64,
    /// Pairs that received at least one correction
    pub pairs_repaired: Vec<String>,
}

pub struct RepairService {
    store: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn PubSubBroker>,
    reserve_tolerance_secs: i64,
}

impl RepairService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn PubSubBroker>,
        reserve_tolerance_secs: i64,
    ) -> Self {
        Self {
            store,
            publisher,
            reserve_tolerance_secs,
        }
    }

    /// `pair:updated` payload: the pair id plus its token ids, so token
    /// charts priced from this pair are evicted too.
    async fn pair_updated_payload(&self, pair_id: &str) -> serde_json::Value {
        match self.store.find_pair(pair_id).await {
            Ok(Some(pair)) => json!({
                "id": pair_id,
                "token0": pair.token0.id,
                "token1": pair.token1.id,
            }),
            Ok(None) => json!({ "id": pair_id }),
            Err(e) => {
                warn!("Failed to load pair {} for its update notice: {:#}", pair_id, e);
                json!({ "id": pair_id })
            }
        }
    }

    /// Fill price fields from the nearest reserve snapshot.
    ///
    /// Writes only values that differ from what is stored, so re-running is a
    /// no-op. Corrections are written in batches; a failed batch counts each
    /// of its rows as failed without stopping the run.
    ///
    /// # Errors
    ///
    /// Fails when the scoped pair does not exist or the snapshot listing
    /// itself cannot be read.
    pub async fn repair_missing_prices(&self, scope: &RepairScope) -> anyhow::Result<RepairReport> {
        let pair_id = match &scope.pair {
            Some(reference) => match self.store.find_pair(reference).await? {
                Some(pair) => Some(pair.id),
                None => anyhow::bail!("Pair {} not found", reference),
            },
            None => None,
        };

        let snapshots = self
            .store
            .snapshots_for_repair(pair_id.clone(), scope.full)
            .await?;
        info!(
            "Repair scanning {} snapshots (pair: {}, full: {})",
            snapshots.len(),
            pair_id.as_deref().unwrap_or("all"),
            scope.full
        );

        let mut report = RepairReport::default();
        let mut pending: Vec<(String, PriceUpdate)> = Vec::new();

        for snapshot in &snapshots {
            report.scanned += 1;

            let reserves = match nearest_reserve(
                self.store.as_ref(),
                &snapshot.pair_id,
                snapshot.timestamp,
                self.reserve_tolerance_secs,
            )
            .await
            {
                Ok(Some(reserves)) => reserves,
                Ok(None) => {
                    report.skipped_no_reserves += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Reserve lookup failed for snapshot {}: {:#}", snapshot.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let (price0, price1) = reserve_prices(&reserves.reserve0, &reserves.reserve1);
            if snapshot.price0.as_ref() == Some(&price0) && snapshot.price1.as_ref() == Some(&price1) {
                report.unchanged += 1;
                continue;
            }
            pending.push((
                snapshot.pair_id.clone(),
                PriceUpdate {
                    snapshot_id: snapshot.id.clone(),
                    price0,
                    price1,
                },
            ));
        }

        let mut touched = BTreeSet::new();
        for chunk in pending.chunks(WRITE_BATCH_SIZE) {
            let updates: Vec<PriceUpdate> = chunk.iter().map(|(_, u)| u.clone()).collect();
            match self.store.update_snapshot_prices_batch(&updates).await {
                Ok(missing) => {
                    for (pair_id, update) in chunk {
                        if missing.contains(&update.snapshot_id) {
                            warn!("Snapshot {} disappeared before its prices were written", update.snapshot_id);
                            report.failed += 1;
                        } else {
                            report.repaired += 1;
                            touched.insert(pair_id.clone());
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to write prices for {} snapshots: {:#}", chunk.len(), e);
                    report.failed += chunk.len() as u64;
                }
            }
        }

        for pair_id in &touched {
            let payload = self.pair_updated_payload(pair_id).await;
            if let Err(e) = self.publisher.publish(Channel::PairUpdated, &payload).await {
                warn!("Failed to publish pair update for {}: {:#}", pair_id, e);
            }
        }
        if report.repaired > 0 {
            if let Err(e) = self
                .publisher
                .publish(Channel::MetricsUpdated, &json!({}))
                .await
            {
                warn!("Failed to publish metrics update: {:#}", e);
            }
        }
        report.pairs_repaired = touched.into_iter().collect();

        metrics::counter!("repair_snapshots_total", "outcome" => "repaired").increment(report.repaired);
        metrics::counter!("repair_snapshots_total", "outcome" => "unchanged").increment(report.unchanged);
        metrics::counter!("repair_snapshots_total", "outcome" => "skipped").increment(report.skipped_no_reserves);
        metrics::counter!("repair_snapshots_total", "outcome" => "failed").increment(report.failed);

        info!(
            "Repair finished: scanned={} repaired={} unchanged={} skipped={} failed={}",
            report.scanned,
            report.repaired,
            report.unchanged,
            report.skipped_no_reserves,
            report.failed
        );
        Ok(report)
    }
}
