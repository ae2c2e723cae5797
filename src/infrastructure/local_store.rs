//! Snapshot store backed by JSON collections on the local filesystem.
//!
//! Expects one file per collection in the data directory (`tokens.json`,
//! `pairs.json`, `price_snapshots.json`, `reserve_snapshots.json`,
//! `volume_snapshots.json`). Missing files load as empty collections so a
//! partially indexed directory still serves what it has.
//!
//! The indexer and repair runs write these files from other processes. Every
//! read compares each file's modification stamp with the one last loaded and
//! reloads the collections that changed.

use crate::domain::{
    Pair, PriceSnapshot, PriceUpdate, RawAmount, ReserveSnapshot, SnapshotStore, Token,
    VolumeSnapshot,
};
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

const TOKENS_FILE: &str = "tokens.json";
const PAIRS_FILE: &str = "pairs.json";
const PRICE_SNAPSHOTS_FILE: &str = "price_snapshots.json";
const RESERVE_SNAPSHOTS_FILE: &str = "reserve_snapshots.json";
const VOLUME_SNAPSHOTS_FILE: &str = "volume_snapshots.json";

const COLLECTIONS: [&str; 5] = [
    TOKENS_FILE,
    PAIRS_FILE,
    PRICE_SNAPSHOTS_FILE,
    RESERVE_SNAPSHOTS_FILE,
    VOLUME_SNAPSHOTS_FILE,
];

/// A pair as stored: tokens referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PairRecord {
    pub id: String,
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub reserve0: RawAmount,
    pub reserve1: RawAmount,
    #[serde(deserialize_with = "crate::domain::numeric::epoch_seconds")]
    pub created_at: i64,
}

/// All collections held by the store.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub tokens: Vec<Token>,
    pub pairs: Vec<PairRecord>,
    pub price_snapshots: Vec<PriceSnapshot>,
    pub reserve_snapshots: Vec<ReserveSnapshot>,
    pub volume_snapshots: Vec<VolumeSnapshot>,
}

/// Identity of a collection file as last seen on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

/// `None` for files that do not exist.
type Stamps = HashMap<&'static str, Option<FileStamp>>;

#[derive(Debug, Default)]
struct Loaded {
    dataset: Dataset,
    stamps: Stamps,
}

pub struct LocalSnapshotStore {
    /// `None` keeps writes in memory only
    base_path: Option<PathBuf>,
    inner: RwLock<Loaded>,
}

impl LocalSnapshotStore {
    /// Load every collection from `base_path`.
    ///
    /// # Errors
    ///
    /// Fails when the directory is missing or a present file is not valid
    /// JSON for its collection.
    pub async fn load<P: AsRef<Path>>(base_path: P) -> anyhow::Result<Self> {
        let base = base_path.as_ref().to_path_buf();
        if !fs::metadata(&base).await.map(|m| m.is_dir()).unwrap_or(false) {
            anyhow::bail!("Data directory {} does not exist", base.display());
        }

        // Stamps first: a write racing the read shows up as a change later
        let stamps = read_stamps(&base).await;
        let mut dataset = Dataset::default();
        for file in COLLECTIONS {
            read_into(&base, file, &mut dataset).await?;
        }
        sort_dataset(&mut dataset);

        info!(
            "Loaded snapshot store from {}: {} tokens, {} pairs, {} price snapshots",
            base.display(),
            dataset.tokens.len(),
            dataset.pairs.len(),
            dataset.price_snapshots.len()
        );

        Ok(Self {
            base_path: Some(base),
            inner: RwLock::new(Loaded { dataset, stamps }),
        })
    }

    /// In-memory store, used by tests and benchmarks.
    pub fn from_dataset(mut dataset: Dataset) -> Self {
        sort_dataset(&mut dataset);
        Self {
            base_path: None,
            inner: RwLock::new(Loaded {
                dataset,
                stamps: Stamps::new(),
            }),
        }
    }

    /// The dataset, with collections rewritten since the last load reloaded.
    async fn current(&self) -> RwLockReadGuard<'_, Loaded> {
        let Some(base) = &self.base_path else {
            return self.inner.read().await;
        };

        let on_disk = read_stamps(base).await;
        let guard = self.inner.read().await;
        if guard.stamps == on_disk {
            return guard;
        }
        drop(guard);

        let mut guard = self.inner.write().await;
        refresh(base, &mut guard).await;
        guard.downgrade()
    }
}

/// Reload every collection whose stamp moved. A file that fails to parse
/// (e.g. caught mid-write) keeps its previous contents and is retried on the
/// next read.
async fn refresh(base: &Path, loaded: &mut Loaded) {
    let on_disk = read_stamps(base).await;
    let mut changed = false;
    for file in COLLECTIONS {
        let stamp = on_disk.get(file).copied().flatten();
        if loaded.stamps.get(file) == Some(&stamp) {
            continue;
        }
        match read_into(base, file, &mut loaded.dataset).await {
            Ok(()) => {
                info!("Reloaded {} after an external write", file);
                loaded.stamps.insert(file, stamp);
                changed = true;
            }
            Err(e) => warn!("Keeping previously loaded {}: {:#}", file, e),
        }
    }
    if changed {
        sort_dataset(&mut loaded.dataset);
    }
}

async fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).await.ok()?;
    Some(FileStamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

async fn read_stamps(base: &Path) -> Stamps {
    let mut stamps = Stamps::new();
    for file in COLLECTIONS {
        stamps.insert(file, file_stamp(&base.join(file)).await);
    }
    stamps
}

async fn read_collection<T: DeserializeOwned>(base: &Path, file: &str) -> anyhow::Result<Vec<T>> {
    let path = base.join(file);
    match fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, treating collection as empty", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn read_into(base: &Path, file: &str, dataset: &mut Dataset) -> anyhow::Result<()> {
    match file {
        TOKENS_FILE => dataset.tokens = read_collection(base, file).await?,
        PAIRS_FILE => dataset.pairs = read_collection(base, file).await?,
        PRICE_SNAPSHOTS_FILE => dataset.price_snapshots = read_collection(base, file).await?,
        RESERVE_SNAPSHOTS_FILE => dataset.reserve_snapshots = read_collection(base, file).await?,
        VOLUME_SNAPSHOTS_FILE => dataset.volume_snapshots = read_collection(base, file).await?,
        other => anyhow::bail!("Unknown collection {}", other),
    }
    Ok(())
}

/// Replace a collection file atomically (temp file + rename).
async fn write_collection<T: Serialize>(base: &Path, file: &str, rows: &[T]) -> anyhow::Result<()> {
    let target = base.join(file);
    let tmp = base.join(format!("{}.{}.tmp", file, std::process::id()));
    let body = serde_json::to_vec_pretty(rows)?;
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &target)
        .await
        .with_context(|| format!("Failed to replace {}", target.display()))?;
    Ok(())
}

fn sort_dataset(data: &mut Dataset) {
    data.price_snapshots
        .sort_by_key(|s| (s.timestamp, s.block_number));
    data.reserve_snapshots
        .sort_by_key(|s| (s.timestamp, s.block_number));
    data.volume_snapshots.sort_by_key(|s| s.timestamp);
}

fn hydrate(data: &Dataset, record: &PairRecord) -> Option<Pair> {
    let token = |id: &str| data.tokens.iter().find(|t| t.id == id).cloned();
    let (Some(token0), Some(token1)) = (token(&record.token0), token(&record.token1)) else {
        warn!("Pair {} references an unknown token, skipping", record.id);
        return None;
    };
    Some(Pair {
        id: record.id.clone(),
        address: record.address.clone(),
        token0,
        token1,
        reserve0: record.reserve0.clone(),
        reserve1: record.reserve1.clone(),
        created_at: record.created_at,
    })
}

/// Newest first, then deepest reserve on the given side.
fn sort_pairs_for_side(pairs: &mut [Pair], is_token0: bool) {
    pairs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.reserve(is_token0).magnitude().cmp(&a.reserve(is_token0).magnitude()))
    });
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn find_token(&self, reference: &str) -> anyhow::Result<Option<Token>> {
        let loaded = self.current().await;
        Ok(loaded.dataset.tokens.iter().find(|t| t.matches(reference)).cloned())
    }

    async fn find_pair(&self, reference: &str) -> anyhow::Result<Option<Pair>> {
        let loaded = self.current().await;
        let data = &loaded.dataset;
        Ok(data
            .pairs
            .iter()
            .find(|p| p.id == reference || p.address.eq_ignore_ascii_case(reference))
            .and_then(|p| hydrate(data, p)))
    }

    async fn pairs_with_token0(&self, token_id: &str) -> anyhow::Result<Vec<Pair>> {
        let loaded = self.current().await;
        let data = &loaded.dataset;
        let mut pairs: Vec<Pair> = data
            .pairs
            .iter()
            .filter(|p| p.token0 == token_id)
            .filter_map(|p| hydrate(data, p))
            .collect();
        sort_pairs_for_side(&mut pairs, true);
        Ok(pairs)
    }

    async fn pairs_with_token1(&self, token_id: &str) -> anyhow::Result<Vec<Pair>> {
        let loaded = self.current().await;
        let data = &loaded.dataset;
        let mut pairs: Vec<Pair> = data
            .pairs
            .iter()
            .filter(|p| p.token1 == token_id)
            .filter_map(|p| hydrate(data, p))
            .collect();
        sort_pairs_for_side(&mut pairs, false);
        Ok(pairs)
    }

    async fn list_pairs(&self) -> anyhow::Result<Vec<Pair>> {
        let loaded = self.current().await;
        let data = &loaded.dataset;
        Ok(data.pairs.iter().filter_map(|p| hydrate(data, p)).collect())
    }

    async fn price_snapshots(&self, pair_id: &str, since: i64) -> anyhow::Result<Vec<PriceSnapshot>> {
        let loaded = self.current().await;
        Ok(loaded
            .dataset
            .price_snapshots
            .iter()
            .filter(|s| s.pair_id == pair_id && s.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn reserve_snapshots(
        &self,
        pair_id: &str,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<ReserveSnapshot>> {
        let loaded = self.current().await;
        Ok(loaded
            .dataset
            .reserve_snapshots
            .iter()
            .filter(|s| s.pair_id == pair_id && s.timestamp >= from && s.timestamp <= to)
            .cloned()
            .collect())
    }

    async fn nearest_reserve_snapshot(
        &self,
        pair_id: &str,
        timestamp: i64,
    ) -> anyhow::Result<Option<ReserveSnapshot>> {
        let loaded = self.current().await;
        Ok(loaded
            .dataset
            .reserve_snapshots
            .iter()
            .filter(|s| s.pair_id == pair_id)
            .min_by_key(|s| ((s.timestamp - timestamp).abs(), s.timestamp))
            .cloned())
    }

    async fn volume_snapshots(&self, pair_id: &str, since: i64) -> anyhow::Result<Vec<VolumeSnapshot>> {
        let loaded = self.current().await;
        Ok(loaded
            .dataset
            .volume_snapshots
            .iter()
            .filter(|s| s.pair_id == pair_id && s.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn snapshots_for_repair(
        &self,
        pair_id: Option<String>,
        include_complete: bool,
    ) -> anyhow::Result<Vec<PriceSnapshot>> {
        let loaded = self.current().await;
        Ok(loaded
            .dataset
            .price_snapshots
            .iter()
            .filter(|s| pair_id.as_deref().map_or(true, |id| s.pair_id == id))
            .filter(|s| include_complete || !s.has_prices())
            .cloned()
            .collect())
    }

    async fn update_snapshot_prices(
        &self,
        snapshot_id: &str,
        price0: RawAmount,
        price1: RawAmount,
    ) -> anyhow::Result<()> {
        let missing = self
            .update_snapshot_prices_batch(&[PriceUpdate {
                snapshot_id: snapshot_id.to_string(),
                price0,
                price1,
            }])
            .await?;
        if !missing.is_empty() {
            anyhow::bail!("Price snapshot {} not found", snapshot_id);
        }
        Ok(())
    }

    async fn update_snapshot_prices_batch(
        &self,
        updates: &[PriceUpdate],
    ) -> anyhow::Result<Vec<String>> {
        // Held until the file is replaced so concurrent upserts land in order
        let mut guard = self.inner.write().await;
        if let Some(base) = &self.base_path {
            refresh(base, &mut guard).await;
        }

        let positions: HashMap<String, usize> = guard
            .dataset
            .price_snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut missing = Vec::new();
        let mut applied = 0usize;
        for update in updates {
            match positions.get(&update.snapshot_id) {
                Some(&i) => {
                    let snapshot = &mut guard.dataset.price_snapshots[i];
                    snapshot.price0 = Some(update.price0.clone());
                    snapshot.price1 = Some(update.price1.clone());
                    applied += 1;
                }
                None => missing.push(update.snapshot_id.clone()),
            }
        }

        let Some(base) = &self.base_path else {
            return Ok(missing);
        };
        if applied == 0 {
            return Ok(missing);
        }

        match write_collection(base, PRICE_SNAPSHOTS_FILE, &guard.dataset.price_snapshots).await {
            Ok(()) => {
                let stamp = file_stamp(&base.join(PRICE_SNAPSHOTS_FILE)).await;
                guard.stamps.insert(PRICE_SNAPSHOTS_FILE, stamp);
                Ok(missing)
            }
            Err(e) => {
                // Forget the stamp so the next read restores what is on disk
                guard.stamps.remove(PRICE_SNAPSHOTS_FILE);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(id: &str, symbol: &str) -> Token {
        Token {
            id: id.to_string(),
            address: format!("0x{}", id.to_uppercase()),
            symbol: symbol.to_string(),
            decimals: 18,
            price_usd: None,
        }
    }

    fn pair(id: &str, t0: &str, t1: &str, r0: &str, r1: &str, created_at: i64) -> PairRecord {
        PairRecord {
            id: id.to_string(),
            address: format!("0x{}", id),
            token0: t0.to_string(),
            token1: t1.to_string(),
            reserve0: RawAmount::from(r0),
            reserve1: RawAmount::from(r1),
            created_at,
        }
    }

    fn reserve(id: &str, pair_id: &str, ts: i64) -> ReserveSnapshot {
        ReserveSnapshot {
            id: id.to_string(),
            pair_id: pair_id.to_string(),
            timestamp: ts,
            block_number: ts as u64,
            reserve0: RawAmount::from("1"),
            reserve1: RawAmount::from("2"),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            tokens: vec![token("a", "AAA"), token("b", "BBB"), token("c", "CCC")],
            pairs: vec![
                pair("p1", "a", "b", "100", "5", 10),
                pair("p2", "a", "c", "900", "5", 10),
                pair("p3", "a", "c", "1", "5", 20),
                pair("p4", "b", "a", "1", "1", 5),
                pair("orphan", "a", "zzz", "1", "1", 1),
            ],
            reserve_snapshots: vec![
                reserve("r3", "p1", 300),
                reserve("r1", "p1", 100),
                reserve("r2", "p1", 200),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pairs_ordered_by_creation_then_reserve() {
        let store = LocalSnapshotStore::from_dataset(dataset());
        let ids: Vec<String> = store
            .pairs_with_token0("a")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["p3", "p2", "p1"]);

        let as_token1 = store.pairs_with_token1("a").await.unwrap();
        assert_eq!(as_token1.len(), 1);
        assert_eq!(as_token1[0].token1.symbol, "AAA");
    }

    #[tokio::test]
    async fn test_lookup_by_address_is_case_insensitive() {
        let store = LocalSnapshotStore::from_dataset(dataset());
        assert_eq!(store.find_token("0xa").await.unwrap().unwrap().id, "a");
        assert_eq!(store.find_pair("0XP2").await.unwrap().unwrap().id, "p2");
        assert!(store.find_pair("orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nearest_reserve_prefers_earlier_on_tie() {
        let store = LocalSnapshotStore::from_dataset(dataset());
        let nearest = store.nearest_reserve_snapshot("p1", 150).await.unwrap().unwrap();
        assert_eq!(nearest.id, "r1");
        let nearest = store.nearest_reserve_snapshot("p1", 10_000).await.unwrap().unwrap();
        assert_eq!(nearest.id, "r3");
        assert!(store.nearest_reserve_snapshot("p9", 1).await.unwrap().is_none());

        let window = store.reserve_snapshots("p1", 150, 300).await.unwrap();
        assert_eq!(window.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn test_load_and_persist_repairs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TOKENS_FILE),
            json!([{"id": "a", "address": "0xa", "symbol": "AAA", "decimals": 18}]).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(PRICE_SNAPSHOTS_FILE),
            json!([
                {"id": "s2", "pairId": "p1", "timestamp": "200", "blockNumber": 2, "price0": null},
                {"id": "s1", "pairId": "p1", "timestamp": 100, "blockNumber": "1",
                 "price0": "5", "price1": "2"}
            ])
            .to_string(),
        )
        .unwrap();

        let store = LocalSnapshotStore::load(dir.path()).await.unwrap();
        let pending = store.snapshots_for_repair(None, false).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "s2");
        assert_eq!(store.snapshots_for_repair(None, true).await.unwrap().len(), 2);

        store
            .update_snapshot_prices("s2", RawAmount::from("7"), RawAmount::from("8"))
            .await
            .unwrap();
        assert!(store
            .update_snapshot_prices("missing", RawAmount::zero(), RawAmount::zero())
            .await
            .is_err());

        let reloaded = LocalSnapshotStore::load(dir.path()).await.unwrap();
        assert!(reloaded.snapshots_for_repair(None, false).await.unwrap().is_empty());
        let snaps = reloaded.price_snapshots("p1", 0).await.unwrap();
        assert_eq!(snaps[1].price0.as_ref().map(|p| p.as_str()), Some("7"));
    }

    fn write_json(dir: &Path, file: &str, value: serde_json::Value) {
        std::fs::write(dir.join(file), value.to_string()).unwrap();
    }

    fn pending_snapshots(dir: &Path, count: usize) {
        let rows: Vec<serde_json::Value> = (0..count)
            .map(|i| json!({"id": format!("s{}", i), "pairId": "p1", "timestamp": i, "blockNumber": i}))
            .collect();
        write_json(dir, PRICE_SNAPSHOTS_FILE, json!(rows));
    }

    fn update(id: &str, price: &str) -> PriceUpdate {
        PriceUpdate {
            snapshot_id: id.to_string(),
            price0: RawAmount::from(price),
            price1: RawAmount::from("1"),
        }
    }

    #[tokio::test]
    async fn test_writes_from_another_store_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        pending_snapshots(dir.path(), 2);

        let server = LocalSnapshotStore::load(dir.path()).await.unwrap();
        let writer = LocalSnapshotStore::load(dir.path()).await.unwrap();
        assert!(server.price_snapshots("p1", 0).await.unwrap()[0].price0.is_none());

        writer
            .update_snapshot_prices("s0", RawAmount::from("42"), RawAmount::from("1"))
            .await
            .unwrap();

        let seen = server.price_snapshots("p1", 0).await.unwrap();
        assert_eq!(seen[0].price0.as_ref().map(|p| p.as_str()), Some("42"));
        assert_eq!(server.snapshots_for_repair(None, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_rewrite_keeps_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        write_json(
            dir.path(),
            TOKENS_FILE,
            json!([{"id": "a", "address": "0xa", "symbol": "AAA", "decimals": 18}]),
        );
        let store = LocalSnapshotStore::load(dir.path()).await.unwrap();

        std::fs::write(dir.path().join(TOKENS_FILE), "[{\"id\": ").unwrap();
        assert_eq!(store.find_token("a").await.unwrap().unwrap().symbol, "AAA");

        write_json(
            dir.path(),
            TOKENS_FILE,
            json!([{"id": "a", "address": "0xa", "symbol": "AAA2", "decimals": 18}]),
        );
        assert_eq!(store.find_token("a").await.unwrap().unwrap().symbol, "AAA2");
    }

    #[tokio::test]
    async fn test_batch_upsert_reports_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        pending_snapshots(dir.path(), 3);
        let store = LocalSnapshotStore::load(dir.path()).await.unwrap();

        let missing = store
            .update_snapshot_prices_batch(&[update("s0", "5"), update("nope", "6"), update("s2", "7")])
            .await
            .unwrap();
        assert_eq!(missing, vec!["nope".to_string()]);

        let reloaded = LocalSnapshotStore::load(dir.path()).await.unwrap();
        let prices: Vec<Option<String>> = reloaded
            .price_snapshots("p1", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.price0.map(|p| p.as_str().to_string()))
            .collect();
        assert_eq!(prices, vec![Some("5".to_string()), None, Some("7".to_string())]);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        pending_snapshots(dir.path(), 20);
        let store = std::sync::Arc::new(LocalSnapshotStore::load(dir.path()).await.unwrap());

        let writes = (0..20).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_snapshot_prices(&format!("s{}", i), RawAmount::from("9"), RawAmount::from("1"))
                    .await
            })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        let reloaded = LocalSnapshotStore::load(dir.path()).await.unwrap();
        assert!(reloaded.snapshots_for_repair(None, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        assert!(LocalSnapshotStore::load("/nonexistent/dexchart").await.is_err());
    }
}
