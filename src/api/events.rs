//! Server-sent event stream of change notifications.
//!
//! Clients pick channels with `?channels=pair:updated,token:updated` (all
//! channels when omitted). The first event is a `connected` handshake; while
//! the cache connection is suspended it carries an SSE `retry` hint.

use crate::api::handlers::ErrorResponse;
use crate::api::state::AppState;
use crate::domain::{Channel, ChannelMessage};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Comma-separated channel names
    #[param(example = "pair:updated,metrics:updated")]
    pub channels: Option<String>,
}

/// Parse the requested channel list; empty means every channel.
pub fn parse_channels(raw: Option<&str>) -> Result<Vec<Channel>, String> {
    let mut channels = Vec::new();
    for name in raw.unwrap_or_default().split(',').map(str::trim) {
        if name.is_empty() {
            continue;
        }
        let channel = name.parse::<Channel>().map_err(|e| e.to_string())?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    if channels.is_empty() {
        channels = Channel::ALL.to_vec();
    }
    Ok(channels)
}

fn message_event(message: &ChannelMessage) -> Event {
    Event::default()
        .event(message.channel.as_str())
        .data(json!({ "type": message.channel, "payload": message.payload }).to_string())
}

#[utoipa::path(
    get,
    path = "/v1/events",
    tag = "events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream"),
        (status = 400, description = "Unknown channel", body = ErrorResponse)
    )
)]
pub async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let channels = parse_channels(query.channels.as_deref()).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid channels".to_string(),
                details: Some(e),
            }),
        )
    })?;

    // Subscribe before the handshake so nothing published in between is lost
    let receiver = state.event_hub.subscribe();
    info!(
        "Event stream opened for {:?} ({} clients)",
        channels,
        state.event_hub.subscriber_count()
    );
    metrics::counter!("event_streams_opened_total").increment(1);

    let mut handshake = Event::default()
        .event("connected")
        .data(json!({ "type": "connected", "channels": channels }).to_string());
    if let Some(retry_after) = state.connection.retry_after() {
        let advised = Duration::from_millis(state.events.degraded_retry_ms).max(retry_after);
        handshake = handshake.retry(advised);
    }

    let updates = BroadcastStream::new(receiver).filter_map(move |item| {
        let event = match item {
            Ok(message) if channels.contains(&message.channel) => Some(Ok(message_event(&message))),
            Ok(_) => None,
            Err(e) => {
                debug!("Event stream client lagging: {}", e);
                metrics::counter!("event_stream_lagged_total").increment(1);
                None
            }
        };
        async move { event }
    });

    let stream = stream::once(async move { Ok(handshake) }).chain(updates);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.events.heartbeat_secs.max(1)))
            .text("heartbeat"),
    ))
}
