//! Lightweight collaborator backends
//!
//! Let the gateway run end to end without external engines. Useful for
//! local development and load testing the session layer.

use async_trait::async_trait;
use futures::stream;
use voice_gateway_core::{
    AudioFormat, AudioStream, ResponseGenerator, Result, SpeechRecognizer, SpeechSynthesizer,
    TextStream,
};

/// Recognizer that returns the same transcript for every utterance
#[derive(Debug, Clone)]
pub struct FixedRecognizer {
    transcript: String,
}

impl FixedRecognizer {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn transcribe(&self, _audio: &[u8], _format: &AudioFormat) -> Result<String> {
        Ok(self.transcript.clone())
    }
}

/// Agent that repeats the user back
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator;

impl EchoGenerator {
    fn reply(text: &str) -> String {
        format!("You said: {}", text.trim())
    }
}

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, text: &str, _user_id: &str, _session_id: &str) -> Result<String> {
        Ok(Self::reply(text))
    }

    /// Streams the reply word by word
    async fn generate_stream(
        &self,
        text: &str,
        _user_id: &str,
        _session_id: &str,
    ) -> Result<TextStream> {
        let reply = Self::reply(text);
        let fragments: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(fragments)))
    }
}

/// Synthesizer emitting silent 16-bit PCM, one chunk per word
#[derive(Debug, Clone)]
pub struct SilenceSynthesizer {
    bytes_per_word: usize,
}

impl SilenceSynthesizer {
    pub fn new(bytes_per_word: usize) -> Self {
        Self { bytes_per_word }
    }
}

impl Default for SilenceSynthesizer {
    fn default() -> Self {
        // 250ms at 16kHz mono
        Self::new(8000)
    }
}

#[async_trait]
impl SpeechSynthesizer for SilenceSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let words = text.split_whitespace().count().max(1);
        let chunk = vec![0u8; self.bytes_per_word];
        let chunks: Vec<Result<Vec<u8>>> = (0..words).map(|_| Ok(chunk.clone())).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn output_format(&self) -> &str {
        "pcm16"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_echo_stream_rebuilds_reply() {
        let stream = EchoGenerator
            .generate_stream("hello world", "u", "s")
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        assert!(parts.len() > 1);
        assert_eq!(parts.concat(), "You said: hello world");
    }

    #[tokio::test]
    async fn test_silence_chunks_per_word() {
        let synth = SilenceSynthesizer::new(4);
        let chunks: Vec<_> = synth.synthesize("a b c").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(synth.output_format(), "pcm16");
    }
}
