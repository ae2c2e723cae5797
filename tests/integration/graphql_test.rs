//! GraphQL queries against the in-process schema and the `/graphql` route.

use crate::common::{app_state, sample_router, sample_store, UnreachableStore, WETH_ADDRESS};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use dexchart_gateway::api::graphql::create_schema;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn graphql_query(router: axum::Router, body: Value) -> Value {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/graphql")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn error_code(body: &Value) -> Option<&str> {
    body["errors"][0]["extensions"]["code"].as_str()
}

#[tokio::test]
async fn test_token_price_chart_query() {
    let schema = create_schema(app_state(sample_store().await));
    let query = format!(
        r#"{{ tokenPriceChart(tokenAddress: "{}", timeframe: "1d", limit: 10) {{ time value }} }}"#,
        WETH_ADDRESS
    );
    let response = schema.execute(query.as_str()).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);

    let data = response.data.into_json().unwrap();
    let values: Vec<f64> = data["tokenPriceChart"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["value"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![2400.0, 2450.0, 2500.0]);
}

#[tokio::test]
async fn test_volume_and_protocol_field_names() {
    let schema = create_schema(app_state(sample_store().await));
    let response = schema
        .execute(
            r#"{
                pairVolumeChart(pairAddress: "weth-usdc", timeframe: "1w") {
                    time value volume0 volume1 count
                }
                protocolMetrics { totalValueLockedUSD dailyVolumeUSD volume24hChange }
            }"#,
        )
        .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);

    let data = response.data.into_json().unwrap();
    assert_eq!(data["pairVolumeChart"][0]["count"], 14);
    assert_eq!(data["protocolMetrics"]["totalValueLockedUSD"], 500_000.0);
    assert_eq!(data["protocolMetrics"]["dailyVolumeUSD"], 16_900.0);
}

#[tokio::test]
async fn test_pair_price_chart_over_http() {
    let (router, _) = sample_router().await;
    let body = graphql_query(
        router,
        json!({
            "query": "query Pair($addr: String!) { pairPriceChart(pairAddress: $addr, limit: 1) { value } }",
            "operationName": "Pair",
            "variables": { "addr": "weth-usdc" }
        }),
    )
    .await;

    assert!(body.get("errors").is_none(), "{}", body);
    assert_eq!(body["data"]["pairPriceChart"][0]["value"], 2500.0);
}

#[tokio::test]
async fn test_invalid_timeframe_error_code() {
    let (router, _) = sample_router().await;
    let body = graphql_query(
        router,
        json!({ "query": r#"{ pairPriceChart(pairAddress: "weth-usdc", timeframe: "5m") { value } }"# }),
    )
    .await;
    assert_eq!(error_code(&body), Some("INVALID_TIMEFRAME"));
}

#[tokio::test]
async fn test_store_outage_error_code() {
    let schema = create_schema(app_state(Arc::new(UnreachableStore)));
    let response = schema
        .execute(r#"{ tokenPriceChart(tokenAddress: "weth") { value } }"#)
        .await;
    let body = serde_json::to_value(&response).unwrap();
    assert_eq!(error_code(&body), Some("STORE_UNAVAILABLE"));
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let (router, _) = sample_router().await;
    let body = graphql_query(router, json!({ "query": "   " })).await;
    assert_eq!(error_code(&body), Some("EMPTY_QUERY"));
}

#[tokio::test]
async fn test_playground_served() {
    let (router, _) = sample_router().await;
    let response = router
        .oneshot(Request::builder().uri("/graphql").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_token_is_empty_list() {
    let schema = create_schema(app_state(sample_store().await));
    let response = schema
        .execute(r#"{ tokenPriceChart(tokenAddress: "0xdeadbeef") { time value } }"#)
        .await;
    assert!(response.errors.is_empty());
    let data = response.data.into_json().unwrap();
    assert_eq!(data["tokenPriceChart"], json!([]));
}
