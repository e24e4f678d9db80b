//! Operator API router

use axum::{
    extract::FromRef,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::application::events::SharedEventBus;
use crate::interfaces::ws::ws_events_handler;

use super::handlers::{
    health_check, http_metrics_middleware, prometheus_metrics, rpc_handler, server_header, ApiState,
    HealthState,
};

/// Router state; each handler extracts its own part via `FromRef`.
#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
    pub health: HealthState,
    pub event_bus: SharedEventBus,
    pub metrics: Option<PrometheusHandle>,
}

impl RouterState {
    pub fn new(api: ApiState, health: HealthState, event_bus: SharedEventBus) -> Self {
        Self {
            api,
            health,
            event_bus,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(s: &RouterState) -> Self {
        s.api.clone()
    }
}

impl FromRef<RouterState> for HealthState {
    fn from_ref(s: &RouterState) -> Self {
        s.health.clone()
    }
}

impl FromRef<RouterState> for SharedEventBus {
    fn from_ref(s: &RouterState) -> Self {
        s.event_bus.clone()
    }
}

impl FromRef<RouterState> for Option<PrometheusHandle> {
    fn from_ref(s: &RouterState) -> Self {
        s.metrics.clone()
    }
}

async fn not_found(uri: axum::http::Uri) -> impl IntoResponse {
    warn!(path = %uri, "404 on operator API");
    (
        StatusCode::NOT_FOUND,
        [
            (header::SERVER, server_header()),
            (header::CONTENT_TYPE, "application/json; charset=UTF-8".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
    )
}

pub fn create_api_router(state: RouterState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", post(rpc_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/events", get(ws_events_handler))
        .fallback(not_found)
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
