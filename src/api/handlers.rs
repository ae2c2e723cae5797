//! REST handlers for chart series, protocol metrics and system endpoints.

use crate::api::state::AppState;
use crate::application::CacheStats;
use crate::domain::{
    ChartSeries, ChartSubject, ProtocolMetrics, SeriesStatus, Timeframe, VolumeSeries,
};
use crate::infrastructure::ConnectionState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Points returned when the request does not set `limit`.
pub const DEFAULT_CHART_LIMIT: usize = 100;

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Clone, Deserialize, IntoParams, Validate)]
pub struct ChartQuery {
    /// One of 1h, 1d, 1w, 1m, 1y, all (default: 1d)
    #[param(example = "1d")]
    #[validate(length(min = 1, max = 8))]
    pub timeframe: Option<String>,
    /// Maximum number of points (1-1000, default: 100)
    #[param(minimum = 1, maximum = 1000, example = 100)]
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

impl ChartQuery {
    fn parse(&self) -> Result<(Timeframe, usize), (StatusCode, Json<ErrorResponse>)> {
        if let Err(e) = self.validate() {
            return Err(bad_request("Invalid query parameters", e.to_string()));
        }
        let timeframe = match self.timeframe.as_deref() {
            Some(raw) => raw
                .parse::<Timeframe>()
                .map_err(|e| bad_request("Invalid timeframe", e.to_string()))?,
            None => Timeframe::default(),
        };
        Ok((timeframe, self.limit.unwrap_or(DEFAULT_CHART_LIMIT)))
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Error response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn bad_request(error: &str, details: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            details: Some(details),
        }),
    )
}

/// Series bodies are always returned; store outages switch the status to 503.
fn series_response<T: Serialize>(status: SeriesStatus, body: T) -> Response {
    let code = match status {
        SeriesStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        SeriesStatus::Ready | SeriesStatus::NoData => StatusCode::OK,
    };
    (code, Json(body)).into_response()
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dependencies: HealthDependencies,
}

#[derive(Serialize, ToSchema)]
pub struct HealthDependencies {
    /// `redis` or `memory`
    pub cache_backend: String,
    /// Connection lifecycle state (`disabled` without Redis)
    pub cache: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_retry_after_ms: Option<u64>,
    /// Live event stream clients
    pub event_subscribers: usize,
}

// ============================================================================
// System Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Health check passed", body = HealthResponse),
        (status = 503, description = "Cache connection suspended", body = HealthResponse)
    )
)]
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let connection = state.connection.status();
    let (backend, cache_state) = if connection.configured {
        ("redis", connection.state.as_str())
    } else {
        ("memory", "disabled")
    };
    let degraded = connection.configured && connection.state == ConnectionState::Suspended;

    let response = HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: VERSION.to_string(),
        dependencies: HealthDependencies {
            cache_backend: backend.to_string(),
            cache: cache_state.to_string(),
            cache_retry_after_ms: connection.retry_after_ms,
            event_subscribers: state.event_hub.subscriber_count(),
        },
    };

    if degraded {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    } else {
        Ok(Json(response))
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "system",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    )
)]
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/cache/stats",
    tag = "system",
    responses(
        (status = 200, description = "Cache hit/miss statistics", body = CacheStats)
    )
)]
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache_service.get_stats().await)
}

// ============================================================================
// Chart Handlers
// ============================================================================

/// USD price history of a token, sourced from its best pair
#[utoipa::path(
    get,
    path = "/v1/charts/token/{address}",
    tag = "charts",
    params(
        ("address" = String, Path, description = "Token id or contract address"),
        ChartQuery
    ),
    responses(
        (status = 200, description = "Price series (status ready or no_data)", body = ChartSeries),
        (status = 400, description = "Invalid timeframe or limit", body = ErrorResponse),
        (status = 503, description = "Snapshot store unavailable", body = ChartSeries)
    )
)]
#[instrument(skip(state))]
pub async fn token_chart_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (timeframe, limit) = query.parse()?;
    let series = state
        .chart_service
        .get_price_chart_data(&ChartSubject::Token(address), timeframe, limit)
        .await;
    Ok(series_response(series.status, series))
}

/// Price history of a pair: token0 priced in token1
#[utoipa::path(
    get,
    path = "/v1/charts/pair/{address}",
    tag = "charts",
    params(
        ("address" = String, Path, description = "Pair id or contract address"),
        ChartQuery
    ),
    responses(
        (status = 200, description = "Price series (status ready or no_data)", body = ChartSeries),
        (status = 400, description = "Invalid timeframe or limit", body = ErrorResponse),
        (status = 503, description = "Snapshot store unavailable", body = ChartSeries)
    )
)]
#[instrument(skip(state))]
pub async fn pair_chart_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (timeframe, limit) = query.parse()?;
    let series = state
        .chart_service
        .get_price_chart_data(&ChartSubject::Pair(address), timeframe, limit)
        .await;
    Ok(series_response(series.status, series))
}

#[utoipa::path(
    get,
    path = "/v1/charts/pair/{address}/volume",
    tag = "charts",
    params(
        ("address" = String, Path, description = "Pair id or contract address"),
        ChartQuery
    ),
    responses(
        (status = 200, description = "Volume series (status ready or no_data)", body = VolumeSeries),
        (status = 400, description = "Invalid timeframe or limit", body = ErrorResponse),
        (status = 503, description = "Snapshot store unavailable", body = VolumeSeries)
    )
)]
#[instrument(skip(state))]
pub async fn pair_volume_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (timeframe, limit) = query.parse()?;
    let series = state
        .chart_service
        .get_volume_chart_data(&address, timeframe, limit)
        .await;
    Ok(series_response(series.status, series))
}

#[utoipa::path(
    get,
    path = "/v1/protocol/metrics",
    tag = "charts",
    responses(
        (status = 200, description = "Protocol TVL and volume", body = ProtocolMetrics),
        (status = 503, description = "Snapshot store unavailable", body = ErrorResponse)
    )
)]
pub async fn protocol_metrics_handler(
    State(state): State<AppState>,
) -> Result<Json<ProtocolMetrics>, (StatusCode, Json<ErrorResponse>)> {
    state
        .chart_service
        .get_protocol_metrics()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to compute protocol metrics: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "Snapshot store unavailable".to_string(),
                    details: Some(e.to_string()),
                }),
            )
        })
}
