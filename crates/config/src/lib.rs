//! Configuration management for the voice gateway
//!
//! Settings are layered from `config/default`, an optional environment file
//! and `VOICE_GATEWAY__*` environment variables.

pub mod persistence;
pub mod pipeline;
pub mod session;
pub mod settings;

pub use persistence::{DurabilityConfig, PersistenceBackend, PersistenceConfig};
pub use pipeline::PipelineConfig;
pub use session::SessionConfig;
pub use settings::{load_settings, ObservabilityConfig, ServerConfig, Settings};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
