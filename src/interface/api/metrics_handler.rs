//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe relay metrics
///
/// Fails if a recorder is already installed in this process.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "relay_messages_total",
        "Client messages received by the relay, by event name"
    );
    describe_counter!(
        "relay_messages_dropped_total",
        "Client messages dropped by the relay, by reason"
    );
    describe_gauge!(
        "relay_connected_users",
        "Identifiers with a live relay connection"
    );
    describe_gauge!("relay_open_rooms", "Rooms with at least one member");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}
