//! HTTP Endpoints
//!
//! Session inspection, health probes, metrics and the WebSocket upgrade.

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{metrics_handler, record_request};
use crate::session::SessionInfo;
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origins);

    Router::new()
        // Session endpoints
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Metrics
        .route("/metrics", get(metrics_handler))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// List sessions
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    record_request("sessions");
    let sessions: Vec<SessionInfo> = state.registry.list().iter().map(|s| s.info()).collect();
    Json(serde_json::json!({
        "count": sessions.len(),
        "active": state.registry.active_count(),
        "sessions": sessions,
    }))
}

/// Get session info
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    record_request("sessions");
    let session = state.registry.lookup(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(session.info()))
}

/// End a session
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    record_request("sessions");
    if state.registry.lookup(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.registry.disconnect(&id, "api_request").await;
    StatusCode::NO_CONTENT
}

/// Health check
async fn health_check() -> impl IntoResponse {
    record_request("health");
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let accepting = state.queue.is_accepting();
    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if accepting { "ready" } else { "draining" },
            "sessions": {
                "registered": state.registry.count(),
                "active": state.registry.active_count(),
            },
            "durability_queue": state.queue.stats(),
        })),
    )
}
