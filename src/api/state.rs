use crate::application::{CacheService, ChartService, EventHub};
use crate::config::EventsConfig;
use crate::infrastructure::RedisConnection;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub chart_service: Arc<ChartService>,
    pub cache_service: Arc<CacheService>,
    pub event_hub: Arc<EventHub>,
    pub connection: Arc<RedisConnection>,
    /// Installed once at startup; absent in tests
    pub metrics_handle: Option<PrometheusHandle>,
    pub events: EventsConfig,
}
