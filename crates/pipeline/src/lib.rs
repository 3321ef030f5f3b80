//! Per-session turn pipeline
//!
//! This crate provides the live conversational path for one session:
//! - Audio buffering and an energy-based speech gate
//! - The turn state machine (recognize, generate, synthesize)
//! - Sentence segmentation so synthesis starts before generation ends
//! - Cooperative interruption through [`InterruptFlag`]
//! - Simple collaborator backends for running without external engines

pub mod buffer;
pub mod interrupt;
pub mod segmenter;
pub mod simple;
pub mod turn;
pub mod vad;

pub use buffer::AudioBuffer;
pub use interrupt::InterruptFlag;
pub use segmenter::{SegmenterConfig, TextSegmenter};
pub use simple::{EchoGenerator, FixedRecognizer, SilenceSynthesizer};
pub use turn::{Collaborators, OutboundSink, TurnCounters, TurnPipeline, TurnRecorder, TurnState};
pub use vad::EnergyValidator;

use thiserror::Error;
use voice_gateway_core::{CoreError, ErrorCategory};

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CoreError),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
}

impl PipelineError {
    /// Wire category reported in the `error` event
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Collaborator(e) => e.category(),
            PipelineError::UnsupportedFormat(_) | PipelineError::BufferOverflow { .. } => {
                ErrorCategory::InvalidMessage
            }
        }
    }
}
