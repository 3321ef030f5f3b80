//! Wire protocol
//!
//! Every frame is a JSON envelope:
//!
//! ```text
//! { "event": <string>, "data": { "session_id": <string>, ...fields } }
//! ```
//!
//! Inbound and outbound messages are separate enums so each direction has a
//! closed, exhaustively matchable set of events.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use voice_gateway_core::ErrorCategory;

use crate::TransportError;

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Microphone audio, already base64-decoded
    AudioChunk {
        audio: Vec<u8>,
        format: String,
        is_final: bool,
    },
    /// User started speaking over the agent
    Interrupt,
    /// Keep-alive
    Heartbeat,
    /// Diagnostic round trip; payload is echoed back
    Test(Value),
}

impl InboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio_chunk",
            Self::Interrupt => "interrupt",
            Self::Heartbeat => "heartbeat",
            Self::Test(_) => "test",
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawAudioChunk {
    audio_chunk: String,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default)]
    is_final: bool,
}

fn default_format() -> String {
    "wav".to_string()
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Session the client believes it is talking to, if it said
    pub session_id: Option<String>,
    pub message: InboundMessage,
}

impl InboundEnvelope {
    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
        let mut data = raw.data;

        let session_id = match data.remove("session_id") {
            Some(Value::String(id)) => Some(id),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(TransportError::InvalidMessage(format!(
                    "session_id must be a string, got {}",
                    other
                )))
            }
        };

        let message = match raw.event.as_str() {
            "audio_chunk" => {
                let chunk: RawAudioChunk = serde_json::from_value(Value::Object(data))
                    .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
                let audio = BASE64
                    .decode(chunk.audio_chunk.as_bytes())
                    .map_err(|e| TransportError::InvalidMessage(format!("bad base64 audio: {}", e)))?;
                InboundMessage::AudioChunk {
                    audio,
                    format: chunk.format,
                    is_final: chunk.is_final,
                }
            }
            "interrupt" => InboundMessage::Interrupt,
            "heartbeat" | "ping" => InboundMessage::Heartbeat,
            "test" => InboundMessage::Test(Value::Object(data)),
            other => return Err(TransportError::UnknownEvent(other.to_string())),
        };

        Ok(Self { session_id, message })
    }

    /// Encode as a client would; used by tests and tooling
    pub fn encode(&self) -> String {
        let mut data = match &self.message {
            InboundMessage::AudioChunk {
                audio,
                format,
                is_final,
            } => {
                let mut map = Map::new();
                map.insert("audio_chunk".into(), Value::String(BASE64.encode(audio)));
                map.insert("format".into(), Value::String(format.clone()));
                map.insert("is_final".into(), Value::Bool(*is_final));
                map
            }
            InboundMessage::Test(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        if let Some(id) = &self.session_id {
            data.insert("session_id".into(), Value::String(id.clone()));
        }

        serde_json::json!({ "event": self.message.event_name(), "data": data }).to_string()
    }
}

/// Result of the pre-recognition speech check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadStatus {
    /// Audio buffered, waiting for more or for `is_final`
    Buffering,
    /// Speech detected and sent for recognition
    Speech,
    /// Nothing recognisable; turn ended early
    NoSpeech,
}

/// Messages sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected {
        user_id: String,
    },
    AudioReceived {
        vad_status: VadStatus,
        bytes_buffered: usize,
    },
    Transcription {
        text: String,
    },
    AgentResponse {
        text: String,
    },
    AgentResponseChunk {
        text: String,
        chunk_index: usize,
    },
    TtsChunk {
        /// Base64 audio
        audio_chunk: String,
        chunk_index: usize,
        format: String,
    },
    StreamingComplete {
        total_chunks_sent: usize,
    },
    StreamingInterrupted {
        total_chunks_sent: usize,
    },
    TestResponse {
        echo: Value,
    },
    Error {
        error_type: ErrorCategory,
        message: String,
    },
}

impl OutboundMessage {
    pub fn tts_chunk(audio: &[u8], chunk_index: usize, format: impl Into<String>) -> Self {
        Self::TtsChunk {
            audio_chunk: BASE64.encode(audio),
            chunk_index,
            format: format.into(),
        }
    }

    pub fn error(error_type: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Error {
            error_type,
            message: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::AudioReceived { .. } => "audio_received",
            Self::Transcription { .. } => "transcription",
            Self::AgentResponse { .. } => "agent_response",
            Self::AgentResponseChunk { .. } => "agent_response_chunk",
            Self::TtsChunk { .. } => "tts_chunk",
            Self::StreamingComplete { .. } => "streaming_complete",
            Self::StreamingInterrupted { .. } => "streaming_interrupted",
            Self::TestResponse { .. } => "test_response",
            Self::Error { .. } => "error",
        }
    }
}

/// Outbound frame addressed to one session
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    pub session_id: String,
    pub message: OutboundMessage,
}

impl OutboundEnvelope {
    pub fn new(session_id: impl Into<String>, message: OutboundMessage) -> Self {
        Self {
            session_id: session_id.into(),
            message,
        }
    }

    /// Encode to a JSON text frame with `session_id` folded into `data`
    pub fn encode(&self) -> Result<String, TransportError> {
        let mut value = serde_json::to_value(&self.message)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        if let Value::Object(envelope) = &mut value {
            let data = envelope
                .entry("data")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(fields) = data {
                fields.insert("session_id".into(), Value::String(self.session_id.clone()));
            }
        }

        Ok(value.to_string())
    }

    /// Decode a server frame; used by tests and client tooling
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let mut value: Value =
            serde_json::from_str(text).map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        let session_id = value
            .get_mut("data")
            .and_then(Value::as_object_mut)
            .and_then(|data| data.remove("session_id"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| TransportError::InvalidMessage("missing data.session_id".into()))?;

        let message = serde_json::from_value(value)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        Ok(Self { session_id, message })
    }
}
