use crate::api::doc::ApiDoc;
use crate::api::events::events_handler;
use crate::api::graphql::{create_schema, graphql_handler, graphql_playground};
use crate::api::handlers::{
    cache_stats_handler, health_handler, metrics_handler, pair_chart_handler,
    pair_volume_handler, protocol_metrics_handler, token_chart_handler,
};
use crate::api::state::AppState;
use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};

use axum::http::HeaderValue;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        return CorsLayer::permissive();
    }

    // Parse comma-separated origins, filter out invalid ones
    let origin_values: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    match origin_values.len() {
        0 => {
            tracing::warn!("No valid CORS origins found, falling back to permissive CORS");
            CorsLayer::permissive()
        }
        1 => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin_values[0].clone()))
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::new()
            .allow_origin(AllowOrigin::list(origin_values))
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

/// Per-route request counters and latency histograms.
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();

    let status_code = response.status().as_u16();
    let status = status_code.to_string();
    let status_class = format!("{}xx", status_code / 100);

    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone(),
        "status_class" => status_class
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .record(latency.as_secs_f64());

    if latency.as_millis() > 1000 {
        tracing::warn!("Slow HTTP request: {} {} took {}ms", method, path, latency.as_millis());
    }
    response
}

pub fn create_router(state: AppState, allowed_origins: &str) -> Router {
    let schema = create_schema(state.clone());

    let layers = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path()
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(cors_layer(allowed_origins));

    let request_routes = Router::new()
        // System endpoints (no versioning)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // OpenAPI document (downloadable)
        .route("/v1/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .route("/v1/cache/stats", get(cache_stats_handler))
        // Charts
        .route("/v1/charts/token/{address}", get(token_chart_handler))
        .route("/v1/charts/pair/{address}", get(pair_chart_handler))
        .route("/v1/charts/pair/{address}/volume", get(pair_volume_handler))
        .route("/v1/protocol/metrics", get(protocol_metrics_handler))
        // GraphQL endpoint (schema passed via extension layer)
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ));

    // Event streams are long-lived and stay outside the request timeout
    let stream_routes = Router::new().route("/v1/events", get(events_handler));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(request_routes)
        .merge(stream_routes)
        .route_layer(middleware::from_fn(track_http_metrics))
        .layer(axum::Extension(schema))
        .layer(layers)
        .with_state(state)
}
