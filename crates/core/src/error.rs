//! Error types for the voice gateway

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// Category reported to clients in `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Write to a dead connection
    ConnectionError,
    /// Message referenced an unknown or ended session
    InvalidSession,
    /// Message could not be decoded
    InvalidMessage,
    /// Speech recognition call failed
    RecognitionFailure,
    /// Agent generation call failed
    GenerationFailure,
    /// Speech synthesis call failed
    SynthesisFailure,
    /// Durable store write failed after retries
    PersistenceFailure,
    /// Durability queue at capacity
    QueueFull,
    /// Collaborator call exceeded its deadline
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "connection_error",
            Self::InvalidSession => "invalid_session",
            Self::InvalidMessage => "invalid_message",
            Self::RecognitionFailure => "recognition_failure",
            Self::GenerationFailure => "generation_failure",
            Self::SynthesisFailure => "synthesis_failure",
            Self::PersistenceFailure => "persistence_failure",
            Self::QueueFull => "queue_full",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by collaborators on the live path
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Wire category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Recognition(_) | CoreError::UnsupportedFormat(_) => {
                ErrorCategory::RecognitionFailure
            }
            CoreError::Generation(_) => ErrorCategory::GenerationFailure,
            CoreError::Synthesis(_) => ErrorCategory::SynthesisFailure,
            CoreError::Timeout { .. } => ErrorCategory::Timeout,
            CoreError::Other(_) => ErrorCategory::GenerationFailure,
        }
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        CoreError::Other(msg.into())
    }
}
