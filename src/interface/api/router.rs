//! API Router configuration

use super::metrics_handler::metrics_handler;
use super::ws_handler::ws_handler;
use crate::application::SignalingRelay;
use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub connected_users: usize,
    pub open_rooms: usize,
}

pub async fn health_check(State(relay): State<Arc<SignalingRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        connected_users: relay.presence().len().await,
        open_rooms: relay.rooms().room_count().await,
    })
}

/// Build the relay router
///
/// `/metrics` is only mounted when a Prometheus recorder was installed.
pub fn build_router(relay: Arc<SignalingRelay>, prometheus_handle: Option<PrometheusHandle>) -> Router {
    let relay_routes = Router::new()
        .route("/health", get(health_check))
        .route("/socket", get(ws_handler))
        .with_state(relay);

    let mut router = Router::new().merge(relay_routes);

    if let Some(handle) = prometheus_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        router = router.merge(metrics_routes);
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
