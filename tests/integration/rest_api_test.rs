//! REST endpoints exercised through the full router.

use crate::common::{app_state, sample_router, UnreachableStore, PAIR_ADDRESS, WETH_ADDRESS};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use dexchart_gateway::api::routes::create_router;
use dexchart_gateway::domain::{Channel, ChannelMessage};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn values(body: &Value) -> Vec<f64> {
    body["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["value"].as_f64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dependencies"]["cache_backend"], "memory");
    assert_eq!(body["dependencies"]["cache"], "disabled");
    assert!(body.get("version").is_some());
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let (router, _) = sample_router().await;
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let (router, _) = sample_router().await;
    let (status, _) = get(router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_token_chart_by_address() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, &format!("/v1/charts/token/{}?timeframe=1d", WETH_ADDRESS)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["source"]["pairId"], "weth-usdc");
    assert_eq!(body["source"]["isToken0"], true);
    // The middle snapshot has no indexed price and is rebuilt from reserves
    assert_eq!(values(&body), vec![2400.0, 2450.0, 2500.0]);

    let times: Vec<i64> = body["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["time"].as_i64().unwrap())
        .collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_token_chart_respects_timeframe_and_limit() {
    let (router, _) = sample_router().await;
    let (_, hour) = get(router.clone(), &format!("/v1/charts/token/{}?timeframe=1h", WETH_ADDRESS)).await;
    assert_eq!(values(&hour), vec![2500.0]);

    let (_, limited) = get(router, &format!("/v1/charts/token/{}?limit=2", WETH_ADDRESS)).await;
    // Most recent points survive the cap
    assert_eq!(values(&limited), vec![2450.0, 2500.0]);
}

#[tokio::test]
async fn test_chart_rejects_invalid_parameters() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router.clone(), "/v1/charts/token/weth?timeframe=5m").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid timeframe");

    let (status, _) = get(router, "/v1/charts/pair/weth-usdc?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_token_is_no_data() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, "/v1/charts/token/0xdeadbeef").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_data");
    assert!(body["points"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pair_price_and_volume_charts() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router.clone(), &format!("/v1/charts/pair/{}", PAIR_ADDRESS)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(values(&body), vec![2400.0, 2450.0, 2500.0]);

    let (status, body) = get(router, "/v1/charts/pair/weth-usdc/volume?timeframe=1w").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    let points = body["points"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["volume0"], 5.0);
    assert_eq!(points[0]["volume1"], 12000.0);
    assert_eq!(points[0]["count"], 14);
    // Only the USDC side has a USD price
    assert_eq!(points[0]["value"], 12000.0);
}

#[tokio::test]
async fn test_protocol_metrics() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, "/v1/protocol/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalValueLockedUSD"], 500_000.0);
    assert_eq!(body["dailyVolumeUSD"], 16_900.0);
    assert_eq!(body["volume24hChange"], 0.0);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let router = create_router(app_state(Arc::new(UnreachableStore)), "*");

    let (status, body) = get(router.clone(), "/v1/charts/token/weth").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unavailable");
    assert!(body["points"].as_array().unwrap().is_empty());

    let (status, _) = get(router, "/v1/protocol/metrics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cache_stats_track_chart_requests() {
    let (router, _) = sample_router().await;
    let uri = format!("/v1/charts/token/{}", WETH_ADDRESS);
    get(router.clone(), &uri).await;
    get(router.clone(), &uri).await;

    let (status, body) = get(router, "/v1/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert!(body["cache_hits"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_event_stream_handshake_and_delivery() {
    let (router, state) = sample_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/events?channels=pair:updated")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = response.into_body().into_data_stream();
    let handshake = stream.next().await.unwrap().unwrap();
    let handshake = String::from_utf8_lossy(&handshake);
    assert!(handshake.contains("event: connected"));
    assert!(handshake.contains("pair:updated"));

    // Filtered out: not a requested channel
    state
        .event_hub
        .handle_message(ChannelMessage::new(Channel::MetricsUpdated, json!({})))
        .await;
    state
        .event_hub
        .handle_message(ChannelMessage::new(Channel::PairUpdated, json!({ "id": "weth-usdc" })))
        .await;

    let frame = stream.next().await.unwrap().unwrap();
    let frame = String::from_utf8_lossy(&frame);
    assert!(frame.contains("event: pair:updated"));
    assert!(frame.contains("weth-usdc"));
}

#[tokio::test]
async fn test_event_stream_rejects_unknown_channel() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, "/v1/events?channels=pair:created").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid channels");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (router, _) = sample_router().await;
    let (status, body) = get(router, "/v1/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/v1/charts/token/{address}").is_some());
}
