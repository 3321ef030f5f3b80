//! Collaborator interfaces
//!
//! Recognition, generation and synthesis engines live outside this workspace.
//! The session layer only depends on these traits.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{AudioFormat, Result};

/// Stream of reply text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of synthesized audio byte chunks
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe a complete utterance. An empty string means "no speech".
    async fn transcribe(&self, audio: &[u8], format: &AudioFormat) -> Result<String>;
}

/// Cheap pre-check run before spending a recognition call
#[async_trait]
pub trait SpeechValidator: Send + Sync {
    /// Returns `false` for input that is clearly silence
    async fn contains_speech(&self, audio: &[u8], format: &AudioFormat) -> Result<bool>;
}

/// Language-model agent turning a transcript into a reply
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Single-shot reply
    async fn generate(&self, text: &str, user_id: &str, session_id: &str) -> Result<String>;

    /// Incremental reply. The default yields the single-shot reply as one fragment.
    async fn generate_stream(
        &self,
        text: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<TextStream> {
        let reply = self.generate(text, user_id, session_id).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(reply) })))
    }
}

/// Text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one text segment into a stream of audio chunks
    async fn synthesize(&self, text: &str) -> Result<AudioStream>;

    /// Encoding of produced chunks, reported in `tts_chunk.format`
    fn output_format(&self) -> &str {
        "wav"
    }
}
