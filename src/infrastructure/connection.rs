//! Process-wide Redis connection owner.
//!
//! Only this component creates or tears down Redis connections; the cache
//! repository and the pub/sub broker borrow them through [`RedisConnection`].
//! Repeated failures suspend the connection for a capped, exponentially
//! growing period during which callers get `None` immediately and treat it as
//! a cache miss.

use crate::config::CacheConfig;
use deadpool_redis::redis;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{error, info, warn};

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Suspended,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Suspended => "suspended",
        }
    }
}

/// Failure/backoff policy for the shared connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPolicy {
    pub failure_threshold: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub operation_timeout: Duration,
}

impl ConnectionPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            base_backoff: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms.max(config.backoff_base_ms)),
            operation_timeout: config.operation_timeout(),
        }
    }

    /// Suspension lengths: base, 2x base, 4x base, ... capped at the max.
    pub fn backoff_schedule(&self) -> ExponentialBackoff {
        let base_ms = self.base_backoff.as_millis() as u64;
        ExponentialBackoff::from_millis(2)
            .factor((base_ms + 1) / 2)
            .max_delay(self.max_backoff)
    }
}

#[derive(Debug)]
struct Health {
    state: ConnectionState,
    consecutive_failures: u32,
    backoff: ExponentialBackoff,
    suspended_until: Option<Instant>,
}

/// Snapshot of connection health for `/health` and the event stream.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub configured: bool,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    /// Remaining suspension in milliseconds
    pub retry_after_ms: Option<u64>,
}

pub struct RedisConnection {
    pool: Option<Pool>,
    client: Option<redis::Client>,
    policy: ConnectionPolicy,
    health: Mutex<Health>,
}

impl RedisConnection {
    /// Build the pool lazily; no I/O happens until the first request.
    pub fn new(url: Option<&str>, policy: ConnectionPolicy) -> Self {
        let (pool, client) = match url {
            Some(redis_url) => {
                let mut cfg = Config::from_url(redis_url);
                cfg.pool = Some(PoolConfig {
                    max_size: 16,
                    timeouts: Timeouts {
                        wait: Some(policy.operation_timeout),
                        create: Some(policy.operation_timeout),
                        recycle: Some(policy.operation_timeout),
                    },
                    ..Default::default()
                });
                let pool = match cfg.create_pool(Some(Runtime::Tokio1)) {
                    Ok(pool) => {
                        info!("Redis connection pool initialized");
                        Some(pool)
                    }
                    Err(e) => {
                        error!("Failed to create Redis connection pool: {}", e);
                        None
                    }
                };
                let client = match redis::Client::open(redis_url) {
                    Ok(client) => Some(client),
                    Err(e) => {
                        error!("Invalid Redis URL for pub/sub client: {}", e);
                        None
                    }
                };
                (pool, client)
            }
            None => {
                info!("Redis URL not provided, using in-process cache and pub/sub");
                (None, None)
            }
        };

        Self {
            pool,
            client,
            policy,
            health: Mutex::new(Health {
                state: ConnectionState::Disconnected,
                consecutive_failures: 0,
                backoff: policy.backoff_schedule(),
                suspended_until: None,
            }),
        }
    }

    /// A connection that never reaches Redis (tests, no-Redis mode).
    pub fn disabled(policy: ConnectionPolicy) -> Self {
        Self::new(None, policy)
    }

    pub fn is_configured(&self) -> bool {
        self.pool.is_some()
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.with_health(|h| h.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn status(&self) -> ConnectionStatus {
        let now = Instant::now();
        let (state, failures, until) = self
            .with_health(|h| (h.state, h.consecutive_failures, h.suspended_until))
            .unwrap_or((ConnectionState::Disconnected, 0, None));
        ConnectionStatus {
            configured: self.is_configured(),
            state,
            consecutive_failures: failures,
            retry_after_ms: until
                .filter(|u| *u > now && state == ConnectionState::Suspended)
                .map(|u| (u - now).as_millis() as u64),
        }
    }

    /// Remaining suspension, if suspended.
    pub fn retry_after(&self) -> Option<Duration> {
        self.status().retry_after_ms.map(Duration::from_millis)
    }

    /// Borrow a pooled connection, or `None` when unconfigured/suspended/down.
    pub async fn connection(&self) -> Option<deadpool_redis::Connection> {
        let pool = self.pool.as_ref()?;
        if !self.admit() {
            return None;
        }
        match tokio::time::timeout(self.policy.operation_timeout, pool.get()).await {
            Ok(Ok(conn)) => {
                self.record_success();
                Some(conn)
            }
            Ok(Err(e)) => {
                self.record_failure(&e);
                None
            }
            Err(_) => {
                self.record_failure(&"timed out acquiring connection");
                None
            }
        }
    }

    /// Open a dedicated subscriber connection.
    pub async fn open_pubsub(&self) -> anyhow::Result<redis::aio::PubSub> {
        let Some(client) = self.client.as_ref() else {
            anyhow::bail!("Redis is not configured");
        };
        if !self.admit() {
            anyhow::bail!("Redis connection is suspended");
        }
        match tokio::time::timeout(self.policy.operation_timeout, client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => {
                self.record_success();
                Ok(pubsub)
            }
            Ok(Err(e)) => {
                self.record_failure(&e);
                Err(e.into())
            }
            Err(_) => {
                self.record_failure(&"timed out opening pub/sub connection");
                anyhow::bail!("Timed out opening Redis pub/sub connection")
            }
        }
    }

    /// Whether the next request would be let through. Does not change state.
    pub fn is_admissible(&self) -> bool {
        self.with_health(|h| match (h.state, h.suspended_until) {
            (ConnectionState::Suspended, Some(until)) => Instant::now() >= until,
            _ => true,
        })
        .unwrap_or(false)
    }

    /// Whether a request may go to Redis right now.
    ///
    /// An expired suspension lets the next request through as a trial.
    pub fn admit(&self) -> bool {
        self.with_health(|h| match h.state {
            ConnectionState::Suspended => match h.suspended_until {
                Some(until) if Instant::now() < until => false,
                _ => {
                    h.state = ConnectionState::Connecting;
                    h.suspended_until = None;
                    true
                }
            },
            ConnectionState::Disconnected => {
                h.state = ConnectionState::Connecting;
                true
            }
            _ => true,
        })
        .unwrap_or(false)
    }

    pub fn record_success(&self) {
        let policy = self.policy;
        let recovered = self
            .with_health(|h| {
                let recovered = h.state != ConnectionState::Connected;
                h.state = ConnectionState::Connected;
                h.consecutive_failures = 0;
                h.backoff = policy.backoff_schedule();
                h.suspended_until = None;
                recovered
            })
            .unwrap_or(false);
        if recovered {
            info!("Redis connection established");
        }
    }

    pub fn record_failure(&self, err: &dyn Display) {
        let policy = self.policy;
        let suspended_for = self
            .with_health(|h| {
                h.consecutive_failures += 1;
                if h.consecutive_failures >= policy.failure_threshold {
                    h.consecutive_failures = 0;
                    let backoff = h.backoff.next().unwrap_or(policy.max_backoff);
                    h.state = ConnectionState::Suspended;
                    h.suspended_until = Some(Instant::now() + backoff);
                    Some(backoff)
                } else {
                    h.state = ConnectionState::Connecting;
                    None
                }
            })
            .flatten();

        metrics::counter!("cache_connection_failures_total").increment(1);
        match suspended_for {
            Some(backoff) => warn!(
                "Redis unavailable ({}), suspending cache access for {}ms",
                err,
                backoff.as_millis()
            ),
            None => warn!("Redis operation failed: {}", err),
        }
    }

    fn with_health<R>(&self, f: impl FnOnce(&mut Health) -> R) -> Option<R> {
        match self.health.lock() {
            Ok(mut health) => Some(f(&mut health)),
            Err(_) => {
                warn!("Failed to acquire lock for connection health (mutex poisoned)");
                None
            }
        }
    }
}
