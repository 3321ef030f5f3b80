//! Core types for the voice gateway
//!
//! This crate provides the foundational types shared by every other crate:
//! - Audio format descriptors and PCM helpers
//! - Error taxonomy with wire-visible categories
//! - Conversation turn records
//! - Collaborator traits (recognition, generation, synthesis)

pub mod audio;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{AudioEncoding, AudioFormat};
pub use conversation::{Turn, TurnRole};
pub use error::{CoreError, ErrorCategory, Result};
pub use traits::{
    AudioStream, ResponseGenerator, SpeechRecognizer, SpeechSynthesizer, SpeechValidator,
    TextStream,
};
