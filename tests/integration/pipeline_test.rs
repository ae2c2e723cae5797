//! Repair runs against a copy of the sample store, and the notifications
//! they publish flowing back into cache eviction.

use crate::common::{app_state, sample_data_dir, WETH_ADDRESS};
use dexchart_gateway::application::{RepairReport, RepairScope, RepairService};
use dexchart_gateway::domain::{
    cache_keys, Channel, ChannelMessage, ChartSeries, ChartSubject, PubSubBroker, SnapshotStore,
    Timeframe,
};
use serde_json::json;
use dexchart_gateway::infrastructure::{InMemoryPubSub, LocalSnapshotStore};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn store_copy() -> (TempDir, Arc<LocalSnapshotStore>) {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = tokio::fs::read_dir(sample_data_dir()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        tokio::fs::copy(entry.path(), dir.path().join(entry.file_name()))
            .await
            .unwrap();
    }
    let store = Arc::new(LocalSnapshotStore::load(dir.path()).await.unwrap());
    (dir, store)
}

#[tokio::test]
async fn test_repair_fills_gap_and_persists() {
    let (dir, store) = store_copy().await;
    let service = RepairService::new(store, Arc::new(InMemoryPubSub::default()), 60);

    let report = service
        .repair_missing_prices(&RepairScope::default())
        .await
        .unwrap();
    assert_eq!(
        report,
        RepairReport {
            scanned: 1,
            repaired: 1,
            unchanged: 0,
            skipped_no_reserves: 0,
            failed: 0,
            pairs_repaired: vec!["weth-usdc".to_string()],
        }
    );

    // A fresh load sees the written prices
    let reloaded = LocalSnapshotStore::load(dir.path()).await.unwrap();
    assert!(reloaded.snapshots_for_repair(None, false).await.unwrap().is_empty());
    let snapshots = reloaded.price_snapshots("weth-usdc", 0).await.unwrap();
    let repaired = snapshots
        .iter()
        .find(|s| s.id == "weth-usdc-1700003600")
        .unwrap();
    assert_eq!(repaired.price0.as_ref().map(|p| p.as_str()), Some("2450000000"));
}

#[tokio::test]
async fn test_repair_is_idempotent() {
    let (_dir, store) = store_copy().await;
    let service = RepairService::new(store, Arc::new(InMemoryPubSub::default()), 60);

    service
        .repair_missing_prices(&RepairScope::default())
        .await
        .unwrap();

    let full = RepairScope {
        pair: Some("0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc".to_string()),
        full: true,
    };
    let second = service.repair_missing_prices(&full).await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.repaired, 0);
    assert_eq!(second.unchanged, 3);
    assert!(second.pairs_repaired.is_empty());
}

#[tokio::test]
async fn test_repair_unknown_pair_fails() {
    let (_dir, store) = store_copy().await;
    let service = RepairService::new(store, Arc::new(InMemoryPubSub::default()), 60);
    let scope = RepairScope {
        pair: Some("0xnope".to_string()),
        full: false,
    };
    assert!(service.repair_missing_prices(&scope).await.is_err());
}

#[tokio::test]
async fn test_repair_notifications_evict_cached_charts() {
    let (_dir, store) = store_copy().await;
    let broker = Arc::new(InMemoryPubSub::default());
    let mut notifications = broker.subscribe(&Channel::ALL).await.unwrap();

    let state = app_state(store.clone());
    state
        .chart_service
        .get_price_chart_data(&ChartSubject::Pair("weth-usdc".to_string()), Timeframe::Day, 100)
        .await;
    state
        .chart_service
        .get_price_chart_data(&ChartSubject::Token(WETH_ADDRESS.to_string()), Timeframe::Day, 100)
        .await;
    state.chart_service.get_protocol_metrics().await.unwrap();
    let chart_key = cache_keys::pair_chart("weth-usdc", Timeframe::Day, 100);
    let token_key = cache_keys::token_chart("weth", Timeframe::Day, 100);
    for key in [&chart_key, &token_key] {
        assert!(state.cache_service.get_json::<ChartSeries>(key).await.is_some());
    }

    let repair = RepairService::new(store, broker.clone(), 60);
    repair
        .repair_missing_prices(&RepairScope::default())
        .await
        .unwrap();

    let mut channels = Vec::new();
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(1), notifications.next())
            .await
            .unwrap()
            .unwrap();
        channels.push(message.channel);
        state.event_hub.handle_message(message).await;
    }
    assert_eq!(channels, vec![Channel::PairUpdated, Channel::MetricsUpdated]);

    for key in [&chart_key, &token_key] {
        assert!(state.cache_service.get_json::<ChartSeries>(key).await.is_none());
    }
    assert!(state
        .cache_service
        .get_json::<f64>(cache_keys::PROTOCOL_TVL)
        .await
        .is_none());
}

#[tokio::test]
async fn test_server_store_sees_repair_run_by_another_process() {
    let (dir, server_store) = store_copy().await;
    let repair_store = Arc::new(LocalSnapshotStore::load(dir.path()).await.unwrap());
    assert_eq!(server_store.snapshots_for_repair(None, false).await.unwrap().len(), 1);

    let report = RepairService::new(repair_store, Arc::new(InMemoryPubSub::default()), 60)
        .repair_missing_prices(&RepairScope::default())
        .await
        .unwrap();
    assert_eq!(report.repaired, 1);

    assert!(server_store.snapshots_for_repair(None, false).await.unwrap().is_empty());
    let snapshots = server_store.price_snapshots("weth-usdc", 0).await.unwrap();
    let repaired = snapshots
        .iter()
        .find(|s| s.id == "weth-usdc-1700003600")
        .unwrap();
    assert_eq!(repaired.price0.as_ref().map(|p| p.as_str()), Some("2450000000"));
}

#[tokio::test]
async fn test_indexer_rewrite_reaches_served_charts_after_notification() {
    let (dir, store) = store_copy().await;
    let state = app_state(store);
    let token = ChartSubject::Token(WETH_ADDRESS.to_string());

    let before = state
        .chart_service
        .get_price_chart_data(&token, Timeframe::Day, 100)
        .await;
    assert_eq!(before.points.last().map(|p| p.value), Some(2500.0));

    // Another process rewrites the latest snapshot price
    let path = dir.path().join("price_snapshots.json");
    let mut rows: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
    rows[2]["price0"] = json!("2600000000");
    tokio::fs::write(&path, rows.to_string()).await.unwrap();

    state
        .event_hub
        .handle_message(ChannelMessage::new(
            Channel::PairUpdated,
            json!({"id": "weth-usdc", "token0": "weth", "token1": "usdc"}),
        ))
        .await;

    let after = state
        .chart_service
        .get_price_chart_data(&token, Timeframe::Day, 100)
        .await;
    assert_eq!(after.points.last().map(|p| p.value), Some(2600.0));
}
