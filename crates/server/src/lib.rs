//! Voice Gateway Server
//!
//! Provides the WebSocket and HTTP endpoints, the session registry that owns
//! every live connection, and the heartbeat reaper.

pub mod http;
pub mod metrics;
pub mod reaper;
pub mod session;
pub mod sinks;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use crate::metrics::{init_metrics, metrics_handler};
pub use reaper::HeartbeatReaper;
pub use session::{Session, SessionInfo, SessionRegistry};
pub use sinks::{QueueRecorder, SessionOutlet};
pub use state::AppState;

use thiserror::Error;
use voice_gateway_config::ConfigError;
use voice_gateway_persistence::PersistenceError;
use voice_gateway_transport::TransportError;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session capacity reached ({max} live sessions)")]
    Capacity { max: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Capacity { .. } => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::SessionNotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Transport(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Persistence(_)
            | ServerError::Config(_)
            | ServerError::Metrics(_)
            | ServerError::Io(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
