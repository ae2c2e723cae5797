//! DEX Chart Gateway
//!
//! Serves chart-ready price and volume series for a decentralized exchange,
//! reconstructed from pool snapshots, with Redis caching and live update
//! notifications.
//!
//! # Architecture
//!
//! - **Domain**: Store entities, chart values and repository traits
//! - **Application**: Pair selection, price reconstruction, chart building,
//!   cache invalidation and snapshot repair
//! - **Infrastructure**: Redis, in-memory fallbacks and the JSON snapshot store
//! - **API**: REST, GraphQL and SSE handlers, routing and middleware
//!
//! # Configuration
//!
//! `config.yaml` (path from `CONFIG_PATH`) plus environment overrides:
//! - `REDIS_URL`: Redis connection string; caching and pub/sub run in-process
//!   when unset
//! - `DATA_PATH`: directory holding the snapshot JSON collections
//! - `PORT`: listen port
//! - `RUST_LOG` / `LOG_FORMAT`: log filter and `json` output
//!
//! # Quick Start
//!
//! ```bash
//! export REDIS_URL="redis://localhost:6379"
//! cargo run --release
//!
//! curl http://localhost:3010/health
//! curl "http://localhost:3010/v1/charts/token/0xabc?timeframe=1w&limit=200"
//!
//! # Backfill prices that the indexer left empty
//! cargo run --release -- repair --pair 0xpair
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use dexchart_gateway::api::routes::create_router;
use dexchart_gateway::api::state::AppState;
use dexchart_gateway::application::{
    CacheService, ChartService, EventHub, PairLocator, RepairScope, RepairService, StablecoinList,
};
use dexchart_gateway::config::AppConfig;
use dexchart_gateway::domain::{CacheRepository, PubSubBroker, SnapshotStore};
use dexchart_gateway::infrastructure::{
    ConnectionPolicy, InMemoryCache, InMemoryPubSub, LocalSnapshotStore, RedisConnection,
    RedisPubSub, RedisRepository,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dexchart-gateway", version, about = "DEX chart data gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Fill missing snapshot prices from reserve history
    Repair {
        /// Pair id or address; every pair when omitted
        #[arg(long)]
        pair: Option<String>,
        /// Recompute all snapshots, not only those without prices
        #[arg(long)]
        full: bool,
    },
}

fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let mut config = if std::path::Path::new(&path).exists() {
        AppConfig::load(&path)?
    } else {
        tracing::warn!("{} not found, using default configuration", path);
        AppConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Cache and pub/sub backends: Redis when configured, in-process otherwise.
fn backends(
    connection: &Arc<RedisConnection>,
) -> (Arc<dyn CacheRepository>, Arc<dyn PubSubBroker>) {
    if connection.is_configured() {
        tracing::info!("Using Redis for cache and pub/sub");
        (
            Arc::new(RedisRepository::new(connection.clone())),
            Arc::new(RedisPubSub::new(connection.clone())),
        )
    } else {
        tracing::warn!("REDIS_URL not set - cache and pub/sub are process-local");
        (
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryPubSub::default()),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config()?;

    let connection = Arc::new(RedisConnection::new(
        config.cache.redis_url.as_deref(),
        ConnectionPolicy::from_config(&config.cache),
    ));
    let (cache_repo, broker) = backends(&connection);

    let store: Arc<dyn SnapshotStore> = Arc::new(
        LocalSnapshotStore::load(&config.store.data_path)
            .await
            .with_context(|| format!("Failed to open snapshot store at {}", config.store.data_path))?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, connection, cache_repo, broker, store).await,
        Command::Repair { pair, full } => {
            let service = RepairService::new(store, broker, config.repair.reserve_tolerance_secs);
            let report = service
                .repair_missing_prices(&RepairScope { pair, full })
                .await
                .context("Repair run failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(
    config: AppConfig,
    connection: Arc<RedisConnection>,
    cache_repo: Arc<dyn CacheRepository>,
    broker: Arc<dyn PubSubBroker>,
    store: Arc<dyn SnapshotStore>,
) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let cache_service = Arc::new(CacheService::new(cache_repo));
    let classifier = Arc::new(StablecoinList::new(config.stablecoins.iter()));
    tracing::info!("Stablecoins: {:?}", config.stablecoins);
    let locator = PairLocator::new(store.clone(), classifier);
    let chart_service = Arc::new(ChartService::new(
        store,
        locator,
        cache_service.clone(),
        config.repair.reserve_tolerance_secs,
    ));

    let event_hub = Arc::new(EventHub::new(
        broker,
        cache_service.clone(),
        config.events.channel_capacity,
    ));
    let listener_task = event_hub.clone().spawn();

    let state = AppState {
        chart_service,
        cache_service,
        event_hub,
        connection,
        metrics_handle: Some(metrics_handle),
        events: config.events.clone(),
    };

    let app = create_router(state, &config.server.allowed_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    tracing::info!("DEX chart gateway running at http://{}", addr);

    // Graceful shutdown handling
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error during operation")?;

    listener_task.abort();
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C) to initiate graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
