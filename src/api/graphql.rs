//! GraphQL schema and handlers for chart queries.

use crate::api::handlers::DEFAULT_CHART_LIMIT;
use crate::api::state::AppState;
use crate::application::chart_service::MAX_CHART_POINTS;
use crate::domain::{
    ChartPoint, ChartSubject, ProtocolMetrics, SeriesStatus, Timeframe, VolumePoint,
};
use async_graphql::{
    Context, EmptyMutation, EmptySubscription, ErrorExtensions, Object, Pos,
    Result as GraphQLResult, Schema,
};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::Extension;
use uuid::Uuid;

pub type ChartSchema = Schema<Query, EmptyMutation, EmptySubscription>;

/// Maximum allowed GraphQL query size (50KB)
const MAX_QUERY_SIZE: usize = 50 * 1024;

/// Helper function to create GraphQL errors with proper error codes and context
fn create_graphql_error(
    message: impl Into<String>,
    error_code: &str,
    operation: Option<&str>,
) -> async_graphql::Error {
    async_graphql::Error::new(message).extend_with(|_, e| {
        e.set("code", error_code);
        e.set("timestamp", chrono::Utc::now().to_rfc3339());
        e.set("request_id", Uuid::new_v4().to_string());
        if let Some(op) = operation {
            e.set("operation", op);
        }
    })
}

fn chart_args(
    timeframe: Option<String>,
    limit: Option<i32>,
    operation: &str,
) -> GraphQLResult<(Timeframe, usize)> {
    let timeframe = match timeframe {
        Some(raw) => raw.parse::<Timeframe>().map_err(|e| {
            create_graphql_error(e.to_string(), "INVALID_TIMEFRAME", Some(operation))
        })?,
        None => Timeframe::default(),
    };
    let limit = match limit {
        Some(n) if n >= 1 && (n as usize) <= MAX_CHART_POINTS => n as usize,
        Some(n) => {
            return Err(create_graphql_error(
                format!("limit must be between 1 and {}, got {}", MAX_CHART_POINTS, n),
                "INVALID_LIMIT",
                Some(operation),
            ))
        }
        None => DEFAULT_CHART_LIMIT,
    };
    Ok((timeframe, limit))
}

fn store_unavailable(operation: &str) -> async_graphql::Error {
    create_graphql_error(
        "Snapshot store is unavailable, try again shortly",
        "STORE_UNAVAILABLE",
        Some(operation),
    )
}

/// GraphQL root query type.
pub struct Query;

#[Object]
impl Query {
    /// USD price history of a token, oldest first.
    ///
    /// The price is read from the token's best pair: a stablecoin pair when
    /// one exists, otherwise the deepest pool. Unknown tokens yield an empty
    /// list.
    async fn token_price_chart(
        &self,
        ctx: &Context<'_>,
        token_address: String,
        timeframe: Option<String>,
        limit: Option<i32>,
    ) -> GraphQLResult<Vec<ChartPointObject>> {
        let state = ctx.data::<AppState>()?;
        let (timeframe, limit) = chart_args(timeframe, limit, "tokenPriceChart")?;
        let series = state
            .chart_service
            .get_price_chart_data(&ChartSubject::Token(token_address), timeframe, limit)
            .await;
        if series.status == SeriesStatus::Unavailable {
            return Err(store_unavailable("tokenPriceChart"));
        }
        Ok(series.points.into_iter().map(ChartPointObject).collect())
    }

    /// Price history of a pair, token0 priced in token1.
    async fn pair_price_chart(
        &self,
        ctx: &Context<'_>,
        pair_address: String,
        timeframe: Option<String>,
        limit: Option<i32>,
    ) -> GraphQLResult<Vec<ChartPointObject>> {
        let state = ctx.data::<AppState>()?;
        let (timeframe, limit) = chart_args(timeframe, limit, "pairPriceChart")?;
        let series = state
            .chart_service
            .get_price_chart_data(&ChartSubject::Pair(pair_address), timeframe, limit)
            .await;
        if series.status == SeriesStatus::Unavailable {
            return Err(store_unavailable("pairPriceChart"));
        }
        Ok(series.points.into_iter().map(ChartPointObject).collect())
    }

    /// Traded volume of a pair per bucket.
    async fn pair_volume_chart(
        &self,
        ctx: &Context<'_>,
        pair_address: String,
        timeframe: Option<String>,
        limit: Option<i32>,
    ) -> GraphQLResult<Vec<VolumePointObject>> {
        let state = ctx.data::<AppState>()?;
        let (timeframe, limit) = chart_args(timeframe, limit, "pairVolumeChart")?;
        let series = state
            .chart_service
            .get_volume_chart_data(&pair_address, timeframe, limit)
            .await;
        if series.status == SeriesStatus::Unavailable {
            return Err(store_unavailable("pairVolumeChart"));
        }
        Ok(series.points.into_iter().map(VolumePointObject).collect())
    }

    /// Protocol TVL and 24h volume.
    async fn protocol_metrics(&self, ctx: &Context<'_>) -> GraphQLResult<ProtocolMetricsObject> {
        let state = ctx.data::<AppState>()?;
        let metrics = state.chart_service.get_protocol_metrics().await.map_err(|e| {
            tracing::error!("Failed to compute protocol metrics: {:#}", e);
            store_unavailable("protocolMetrics")
        })?;
        Ok(ProtocolMetricsObject(metrics))
    }
}

// ============================================================================
// Output types
// ============================================================================

pub struct ChartPointObject(ChartPoint);

#[Object(name = "ChartPoint")]
impl ChartPointObject {
    /// Unix timestamp (seconds), bucket-aligned
    async fn time(&self) -> i64 {
        self.0.time
    }
    async fn value(&self) -> f64 {
        self.0.value
    }
}

pub struct VolumePointObject(VolumePoint);

#[Object(name = "VolumePoint")]
impl VolumePointObject {
    async fn time(&self) -> i64 {
        self.0.time
    }
    /// Volume in USD
    async fn value(&self) -> f64 {
        self.0.value
    }
    async fn volume0(&self) -> f64 {
        self.0.volume0
    }
    async fn volume1(&self) -> f64 {
        self.0.volume1
    }
    async fn count(&self) -> u64 {
        self.0.count
    }
}

pub struct ProtocolMetricsObject(ProtocolMetrics);

#[Object(name = "ProtocolMetrics")]
impl ProtocolMetricsObject {
    #[graphql(name = "totalValueLockedUSD")]
    async fn total_value_locked_usd(&self) -> f64 {
        self.0.total_value_locked_usd
    }
    #[graphql(name = "dailyVolumeUSD")]
    async fn daily_volume_usd(&self) -> f64 {
        self.0.daily_volume_usd
    }
    /// Percent change versus the previous 24h
    #[graphql(name = "volume24hChange")]
    async fn volume_24h_change(&self) -> f64 {
        self.0.volume_24h_change
    }
}

// ============================================================================
// Schema and handlers
// ============================================================================

/// Create the GraphQL schema with security and performance features.
pub fn create_schema(state: AppState) -> ChartSchema {
    Schema::build(Query, EmptyMutation, EmptySubscription)
        .data(state)
        .limit_depth(10) // Maximum query depth
        .limit_complexity(1000) // Maximum query complexity
        .finish()
}

fn rejected(message: String, code: &'static str, operation: String) -> GraphQLResponse {
    metrics::counter!(
        "graphql_queries_total",
        "operation" => operation,
        "status" => "validation_error",
        "error_code" => code
    )
    .increment(1);

    let error = async_graphql::Error::new(message).extend_with(|_, e| e.set("code", code));
    let mut response = async_graphql::Response::default();
    response.errors.push(error.into_server_error(Pos::default()));
    response.into()
}

/// GraphQL POST endpoint handler with validation, logging and metrics.
pub async fn graphql_handler(
    Extension(schema): Extension<ChartSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let request = req.into_inner();
    let operation_name = request
        .operation_name
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    if request.query.len() > MAX_QUERY_SIZE {
        tracing::warn!(
            "GraphQL query too large: {} bytes (max: {})",
            request.query.len(),
            MAX_QUERY_SIZE
        );
        return rejected(
            format!(
                "Query too large: {} bytes. Maximum allowed size is {} bytes.",
                request.query.len(),
                MAX_QUERY_SIZE
            ),
            "QUERY_TOO_LARGE",
            operation_name,
        );
    }
    if request.query.trim().is_empty() {
        return rejected(
            "Query cannot be empty".to_string(),
            "EMPTY_QUERY",
            operation_name,
        );
    }

    tracing::debug!(
        "GraphQL query: {} bytes, operation: {}",
        request.query.len(),
        operation_name
    );

    let start = std::time::Instant::now();
    let response = schema.execute(request).await;
    let duration = start.elapsed();

    let status = if response.errors.is_empty() {
        "success"
    } else {
        "error"
    };
    metrics::counter!("graphql_queries_total", "operation" => operation_name.clone(), "status" => status)
        .increment(1);
    metrics::histogram!("graphql_query_duration_ms", "operation" => operation_name.clone())
        .record(duration.as_millis() as f64);

    for error in &response.errors {
        let code = error
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(|v| match v {
                async_graphql::Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "UNKNOWN_ERROR".to_string());
        metrics::counter!("graphql_errors_total", "operation" => operation_name.clone(), "error_code" => code)
            .increment(1);
    }

    if duration.as_millis() > 500 {
        tracing::warn!(
            "Slow GraphQL query took {:?} (operation: {})",
            duration,
            operation_name
        );
    }
    if let Some(error) = response.errors.first() {
        tracing::error!(
            "GraphQL error: {} (operation: {})",
            error.message,
            operation_name
        );
    }

    response.into()
}

/// GraphQL GET endpoint handler (for GraphiQL/Playground).
pub async fn graphql_playground() -> impl axum::response::IntoResponse {
    axum::response::Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}
