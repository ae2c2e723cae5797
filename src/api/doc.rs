use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        // System
        crate::api::handlers::health_handler,
        crate::api::handlers::metrics_handler,
        crate::api::handlers::cache_stats_handler,
        // Charts
        crate::api::handlers::token_chart_handler,
        crate::api::handlers::pair_chart_handler,
        crate::api::handlers::pair_volume_handler,
        crate::api::handlers::protocol_metrics_handler,
        // Events
        crate::api::events::events_handler
    ),
    components(
        schemas(
            crate::api::handlers::HealthResponse,
            crate::api::handlers::HealthDependencies,
            crate::api::handlers::ErrorResponse,
            crate::application::cache_service::CacheStats,
            crate::application::cache_service::NamespaceStats,
            crate::domain::ChartSeries,
            crate::domain::ChartPoint,
            crate::domain::VolumeSeries,
            crate::domain::VolumePoint,
            crate::domain::PriceSource,
            crate::domain::SeriesStatus,
            crate::domain::ProtocolMetrics
        )
    ),
    tags(
        (name = "system", description = "Health, metrics and cache statistics"),
        (name = "charts", description = "Price and volume series for tokens and pairs"),
        (name = "events", description = "Server-sent change notifications")
    ),
    info(
        title = "DEX Chart Gateway API",
        version = "0.1.0",
        description = "Chart-ready price and volume series reconstructed from DEX pool snapshots, with Redis caching and live update notifications."
    )
)]
pub struct ApiDoc;
