use crate::domain::{ReserveSnapshot, SnapshotStore};

/// Reserve snapshot closest to `timestamp`.
///
/// Looks within `±tolerance_secs` first and widens to the nearest snapshot at
/// any distance when the window is empty. Equal distances resolve to the
/// earlier snapshot.
pub async fn nearest_reserve(
    store: &dyn SnapshotStore,
    pair_id: &str,
    timestamp: i64,
    tolerance_secs: i64,
) -> anyhow::Result<Option<ReserveSnapshot>> {
    let window = store
        .reserve_snapshots(
            pair_id,
            timestamp.saturating_sub(tolerance_secs),
            timestamp.saturating_add(tolerance_secs),
        )
        .await?;

    if let Some(closest) = window
        .into_iter()
        .min_by_key(|s| ((s.timestamp - timestamp).abs(), s.timestamp))
    {
        return Ok(Some(closest));
    }

    store.nearest_reserve_snapshot(pair_id, timestamp).await
}
