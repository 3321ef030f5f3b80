//! Observability Metrics
//!
//! Prometheus recorder and the `/metrics` endpoint.

use std::sync::OnceLock;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;
use crate::ServerError;

/// Global Prometheus handle
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Must be called once at startup before recording any metrics.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    register_default_metrics();

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the global metrics handle
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Register default application metrics
fn register_default_metrics() {
    // Sessions
    gauge!("voice_gateway_sessions_active").set(0.0);
    counter!("voice_gateway_sessions_created_total").absolute(0);
    counter!("voice_gateway_sessions_reaped_total").absolute(0);

    // Durability queue
    counter!("voice_gateway_durability_enqueued_total").absolute(0);
    counter!("voice_gateway_durability_dropped_total").absolute(0);
    counter!("voice_gateway_durability_persisted_total").absolute(0);
    counter!("voice_gateway_durability_failed_total").absolute(0);
    counter!("voice_gateway_durability_retries_total").absolute(0);

    // Turns
    counter!("voice_gateway_turns_total").absolute(0);
    counter!("voice_gateway_interruptions_total").absolute(0);
    histogram!("voice_gateway_stage_latency_seconds", "stage" => "recognition").record(0.0);
    histogram!("voice_gateway_stage_latency_seconds", "stage" => "generation").record(0.0);
    histogram!("voice_gateway_stage_latency_seconds", "stage" => "synthesis").record(0.0);
}

/// Record session created
pub fn record_session_created() {
    counter!("voice_gateway_sessions_created_total").increment(1);
}

/// Record active sessions gauge
pub fn record_active_sessions(count: usize) {
    gauge!("voice_gateway_sessions_active").set(count as f64);
}

/// Record request to endpoint
pub fn record_request(endpoint: &'static str) {
    counter!("voice_gateway_requests_total", "endpoint" => endpoint).increment(1);
}

/// Metrics endpoint handler
///
/// Returns Prometheus-formatted metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.registry.active_count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
