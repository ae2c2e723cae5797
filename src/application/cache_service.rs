//! Read-through cache over a [`CacheRepository`].
//!
//! Cache problems never fail a request: a backend error, a suspended Redis
//! connection or an undecodable entry are all treated as a miss, and failed
//! writes are logged and dropped.

use crate::domain::{cache_keys, CacheRepository};
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// TTL configurations for different data types
pub mod ttl {
    /// Token USD prices
    pub const PRICE_SECS: u64 = 60;
    /// Pair reserve USD values
    pub const RESERVE_SECS: u64 = 60;
    /// Price and volume chart series
    pub const CHART_SECS: u64 = 120;
    /// Protocol-wide metrics
    pub const PROTOCOL_SECS: u64 = 300;
}

/// Per-namespace cache statistics
#[derive(Debug, Default)]
struct NamespaceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheStats {
    /// Whether the cache backend currently accepts requests
    pub available: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Keyed by key namespace (`token`, `pair`, `protocol`)
    pub namespaces: HashMap<String, NamespaceStats>,
}

pub struct CacheService {
    cache: Arc<dyn CacheRepository>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    namespace_stats: Mutex<HashMap<String, NamespaceCounters>>,
}

impl CacheService {
    pub fn new(cache: Arc<dyn CacheRepository>) -> Self {
        Self {
            cache,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            namespace_stats: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, key: &str, hit: bool) {
        let namespace = cache_keys::namespace(key).to_string();
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("cache_hits_total", "namespace" => namespace.clone()).increment(1);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("cache_misses_total", "namespace" => namespace.clone()).increment(1);
        }

        if let Ok(mut stats) = self.namespace_stats.lock() {
            let counters = stats.entry(namespace).or_default();
            if hit {
                counters.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            warn!("Failed to acquire lock for namespace stats (mutex poisoned)");
        }
    }

    /// Cached value for `key`, or `None` on miss, backend failure or an
    /// entry that no longer decodes.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cached = match self.cache.get(key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                self.record(key, false);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                self.record(key, false);
                return None;
            }
        };

        match serde_json::from_str::<T>(&cached) {
            Ok(value) => {
                debug!("Cache hit: {}", key);
                self.record(key, true);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.record(key, false);
                None
            }
        }
    }

    /// Store a value; failures are logged and dropped.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.cache.set(key, &json, ttl_secs).await {
            warn!("Failed to write cache entry {}: {}", key, e);
        }
    }

    /// Read-through lookup.
    ///
    /// Flow:
    /// 1. Return the cached value when present
    /// 2. Otherwise run `compute` and cache its result with `ttl_secs`
    ///
    /// Errors from `compute` are returned and nothing is cached.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_json::<T>(key).await {
            return Ok(cached);
        }

        let value = compute().await?;
        self.put_json(key, &value, ttl_secs).await;
        Ok(value)
    }

    /// Delete every key matching a glob pattern, returning how many existed.
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        let keys = match self.cache.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list cache keys for {}: {}", pattern, e);
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        match self.cache.delete(&keys).await {
            Ok(removed) => {
                info!("Invalidated {} cache entries matching {}", removed, pattern);
                metrics::counter!("cache_invalidations_total").increment(removed);
                removed
            }
            Err(e) => {
                warn!("Failed to invalidate {}: {}", pattern, e);
                0
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        self.cache.is_available().await
    }

    /// Get cache statistics
    pub async fn get_stats(&self) -> CacheStats {
        let namespaces = match self.namespace_stats.lock() {
            Ok(map) => map
                .iter()
                .map(|(namespace, c)| {
                    let hits = c.hits.load(Ordering::Relaxed);
                    let misses = c.misses.load(Ordering::Relaxed);
                    (
                        namespace.clone(),
                        NamespaceStats {
                            hits,
                            misses,
                            requests: hits + misses,
                        },
                    )
                })
                .collect(),
            Err(_) => {
                warn!("Failed to acquire lock for namespace stats (mutex poisoned), returning totals only");
                HashMap::new()
            }
        };

        CacheStats {
            available: self.is_available().await,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            namespaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryCache;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ttl_values() {
        assert_eq!(ttl::PRICE_SECS, 60);
        assert!(ttl::CHART_SECS > ttl::PRICE_SECS);
        assert!(ttl::PROTOCOL_SECS > ttl::CHART_SECS);
    }

    #[tokio::test]
    async fn test_get_or_compute_reads_through() {
        let service = CacheService::new(Arc::new(InMemoryCache::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: f64 = service
                .get_or_compute("token:t1:priceUSD", ttl::PRICE_SECS, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1.25)
                })
                .await
                .unwrap();
            assert_eq!(value, 1.25);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = service.get_stats().await;
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.namespaces["token"].requests, 3);
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let service = CacheService::new(Arc::new(InMemoryCache::new()));
        let result: Result<f64> = service
            .get_or_compute("pair:p1:reserveUSD", 60, || async { anyhow::bail!("store down") })
            .await;
        assert!(result.is_err());
        assert!(service.get_json::<f64>("pair:p1:reserveUSD").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = Arc::new(InMemoryCache::new());
        let service = CacheService::new(cache.clone());
        service.put_json("pair:p1:chart:1d:100", &vec![1, 2], 120).await;
        service.put_json("pair:p1:reserveUSD", &10.0, 60).await;
        service.put_json("pair:p2:reserveUSD", &20.0, 60).await;

        assert_eq!(service.invalidate("pair:p1:*").await, 2);
        assert_eq!(service.invalidate("pair:p1:*").await, 0);
        assert_eq!(service.get_json::<f64>("pair:p2:reserveUSD").await, Some(20.0));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set("token:t1:priceUSD", "not json", 60).await.unwrap();
        let service = CacheService::new(cache);
        assert!(service.get_json::<f64>("token:t1:priceUSD").await.is_none());
    }
}
