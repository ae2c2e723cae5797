use async_trait::async_trait;
use dexchart_gateway::api::routes::create_router;
use dexchart_gateway::api::state::AppState;
use dexchart_gateway::application::{
    CacheService, ChartService, EventHub, PairLocator, StablecoinList,
};
use dexchart_gateway::config::{CacheConfig, EventsConfig};
use dexchart_gateway::domain::{
    Pair, PriceSnapshot, PriceUpdate, RawAmount, ReserveSnapshot, SnapshotStore, Token,
    VolumeSnapshot,
};
use dexchart_gateway::infrastructure::{
    ConnectionPolicy, InMemoryCache, InMemoryPubSub, LocalSnapshotStore, RedisConnection,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Fixed clock a few hours after the last sample snapshot.
pub const NOW: i64 = 1_700_010_000;

pub const WETH_ADDRESS: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
pub const PAIR_ADDRESS: &str = "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc";

pub fn sample_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
}

pub async fn sample_store() -> Arc<dyn SnapshotStore> {
    Arc::new(
        LocalSnapshotStore::load(sample_data_dir())
            .await
            .expect("sample data should load"),
    )
}

pub fn app_state(store: Arc<dyn SnapshotStore>) -> AppState {
    let cache_service = Arc::new(CacheService::new(Arc::new(InMemoryCache::new())));
    let locator = PairLocator::new(store.clone(), Arc::new(StablecoinList::new(["USDC", "DAI"])));
    let chart_service = Arc::new(
        ChartService::new(store, locator, cache_service.clone(), 60).with_clock(Arc::new(|| NOW)),
    );
    let event_hub = Arc::new(EventHub::new(
        Arc::new(InMemoryPubSub::default()),
        cache_service.clone(),
        16,
    ));
    let connection = Arc::new(RedisConnection::disabled(ConnectionPolicy::from_config(
        &CacheConfig::default(),
    )));

    AppState {
        chart_service,
        cache_service,
        event_hub,
        connection,
        metrics_handle: None,
        events: EventsConfig::default(),
    }
}

pub async fn sample_router() -> (axum::Router, AppState) {
    let state = app_state(sample_store().await);
    (create_router(state.clone(), "*"), state)
}

/// A store whose backend is down.
pub struct UnreachableStore;

fn store_down<T>() -> anyhow::Result<T> {
    anyhow::bail!("connection refused")
}

#[async_trait]
impl SnapshotStore for UnreachableStore {
    async fn find_token(&self, _reference: &str) -> anyhow::Result<Option<Token>> {
        store_down()
    }
    async fn find_pair(&self, _reference: &str) -> anyhow::Result<Option<Pair>> {
        store_down()
    }
    async fn pairs_with_token0(&self, _token_id: &str) -> anyhow::Result<Vec<Pair>> {
        store_down()
    }
    async fn pairs_with_token1(&self, _token_id: &str) -> anyhow::Result<Vec<Pair>> {
        store_down()
    }
    async fn list_pairs(&self) -> anyhow::Result<Vec<Pair>> {
        store_down()
    }
    async fn price_snapshots(&self, _pair_id: &str, _since: i64) -> anyhow::Result<Vec<PriceSnapshot>> {
        store_down()
    }
    async fn reserve_snapshots(
        &self,
        _pair_id: &str,
        _from: i64,
        _to: i64,
    ) -> anyhow::Result<Vec<ReserveSnapshot>> {
        store_down()
    }
    async fn nearest_reserve_snapshot(
        &self,
        _pair_id: &str,
        _timestamp: i64,
    ) -> anyhow::Result<Option<ReserveSnapshot>> {
        store_down()
    }
    async fn volume_snapshots(&self, _pair_id: &str, _since: i64) -> anyhow::Result<Vec<VolumeSnapshot>> {
        store_down()
    }
    async fn snapshots_for_repair(
        &self,
        _pair_id: Option<String>,
        _include_complete: bool,
    ) -> anyhow::Result<Vec<PriceSnapshot>> {
        store_down()
    }
    async fn update_snapshot_prices(
        &self,
        _snapshot_id: &str,
        _price0: RawAmount,
        _price1: RawAmount,
    ) -> anyhow::Result<()> {
        store_down()
    }
    async fn update_snapshot_prices_batch(
        &self,
        _updates: &[PriceUpdate],
    ) -> anyhow::Result<Vec<String>> {
        store_down()
    }
}
