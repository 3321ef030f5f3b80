//! WebSocket Handler
//!
//! One connection per session. The socket is split: a writer task drains the
//! session's [`ChannelConnection`] into the socket, a turn task owns the
//! [`TurnPipeline`], and the read loop below dispatches inbound frames.
//! Interrupts and heartbeats are handled on the read loop so they take
//! effect while a turn is still running.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use voice_gateway_core::{AudioEncoding, AudioFormat, ErrorCategory};
use voice_gateway_pipeline::TurnPipeline;
use voice_gateway_transport::{ChannelConnection, InboundEnvelope, InboundMessage, OutboundMessage};

use crate::session::Session;
use crate::sinks::{QueueRecorder, SessionOutlet};
use crate::state::AppState;

/// Outbound frames buffered per connection before writes apply backpressure
const OUTBOUND_BUFFER: usize = 256;

/// Query parameters accepted on upgrade
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

/// Audio handed from the read loop to the turn task
struct AudioInput {
    audio: Vec<u8>,
    format: String,
    is_final: bool,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    crate::metrics::record_request("ws");
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut outbound_rx) = ChannelConnection::pair(OUTBOUND_BUFFER);

    let session = match state.registry.connect(connection, &user_id) {
        Ok(session) => session,
        Err(e) => {
            let frame = serde_json::json!({
                "event": "error",
                "data": { "error_type": ErrorCategory::ConnectionError, "message": e.to_string() },
            });
            let _ = sender.send(Message::Text(frame.to_string())).await;
            let _ = sender.close().await;
            return;
        }
    };
    let session_id = session.id.clone();

    // Writer: exits once the registry releases the connection
    let writer_session = session_id.clone();
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match envelope.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(session_id = %writer_session, error = %e, "Dropping unencodable frame");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                tracing::debug!(session_id = %writer_session, error = %e, "Socket write failed");
                break;
            }
        }
        let _ = sender.close().await;
    });

    if let Err(e) = state
        .registry
        .send_critical(&session_id, OutboundMessage::Connected { user_id })
        .await
    {
        tracing::warn!(session_id = %session_id, error = %e, "Handshake failed");
        state.registry.disconnect(&session_id, "handshake_failed").await;
        return;
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(state.settings.session.inbound_buffer.max(1));
    tokio::spawn(run_turns(
        session_pipeline(&state, &session),
        session.clone(),
        inbound_rx,
    ));

    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Socket read failed");
                break;
            }
        };

        if handle_message(&state, &session, &inbound_tx, message).await.is_break() {
            break;
        }
        if !session.is_active() {
            break;
        }
    }

    drop(inbound_tx);
    state.registry.disconnect(&session_id, "client_disconnect").await;
}

/// Turn pipeline sharing the session's interrupt flag and counters
fn session_pipeline(state: &AppState, session: &Arc<Session>) -> TurnPipeline {
    TurnPipeline::new(
        session.id.clone(),
        session.user_id.clone(),
        state.settings.pipeline.clone(),
        state.collaborators.clone(),
        Arc::new(SessionOutlet::new(state.registry.clone(), session.id.clone())),
        Arc::new(QueueRecorder::new(state.queue.clone())),
    )
    .with_interrupt(session.interrupt())
    .with_counters(session.counters())
}

/// Dispatch one socket message; `Break` ends the read loop
async fn handle_message(
    state: &AppState,
    session: &Arc<Session>,
    inbound_tx: &mpsc::Sender<AudioInput>,
    message: Message,
) -> ControlFlow<()> {
    match message {
        Message::Text(text) => handle_frame(state, session, inbound_tx, &text).await,
        Message::Binary(_) => {
            state
                .registry
                .send(
                    &session.id,
                    OutboundMessage::error(
                        ErrorCategory::InvalidMessage,
                        "binary frames are not supported",
                    ),
                )
                .await;
        }
        Message::Close(_) => return ControlFlow::Break(()),
        _ => {
            state.registry.heartbeat(&session.id);
        }
    }
    ControlFlow::Continue(())
}

/// Dispatch one inbound text frame
async fn handle_frame(
    state: &AppState,
    session: &Arc<Session>,
    inbound_tx: &mpsc::Sender<AudioInput>,
    text: &str,
) {
    let registry = &state.registry;

    let envelope = match InboundEnvelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            registry
                .send(&session.id, OutboundMessage::error(ErrorCategory::InvalidMessage, e.to_string()))
                .await;
            return;
        }
    };

    if let Some(claimed) = envelope.session_id.as_deref() {
        if claimed != session.id {
            tracing::warn!(session_id = %session.id, claimed, "Frame addressed to another session");
            registry
                .send(
                    &session.id,
                    OutboundMessage::error(ErrorCategory::InvalidSession, "session_id does not match this connection"),
                )
                .await;
            return;
        }
    }

    registry.heartbeat(&session.id);

    match envelope.message {
        InboundMessage::AudioChunk {
            audio,
            format,
            is_final,
        } => {
            let interrupt = session.interrupt();
            if interrupt.is_outbound() && carries_speech(state, &session.id, &audio, &format).await {
                tracing::info!(session_id = %session.id, "User spoke over the response");
                interrupt.set();
            }

            let input = AudioInput {
                audio,
                format,
                is_final,
            };
            match inbound_tx.try_send(input) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    registry
                        .send(
                            &session.id,
                            OutboundMessage::error(ErrorCategory::QueueFull, "inbound audio buffer full, chunk dropped"),
                        )
                        .await;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(session_id = %session.id, "Turn task gone, dropping audio");
                }
            }
        }
        InboundMessage::Interrupt => {
            tracing::debug!(session_id = %session.id, "Interrupt requested");
            session.interrupt().set();
        }
        InboundMessage::Heartbeat => {}
        InboundMessage::Test(payload) => {
            registry
                .send(&session.id, OutboundMessage::TestResponse { echo: payload })
                .await;
        }
    }
}

/// Run the speech validator over a chunk that arrived mid-response
async fn carries_speech(state: &AppState, session_id: &str, audio: &[u8], format: &str) -> bool {
    let Some(encoding) = AudioEncoding::parse(format) else {
        return false;
    };
    let format = AudioFormat::new(encoding);
    let check = state.collaborators.validator.contains_speech(audio, &format);

    match tokio::time::timeout(state.settings.pipeline.recognition_timeout(), check).await {
        Ok(Ok(speech)) => speech,
        Ok(Err(e)) => {
            tracing::debug!(session_id, error = %e, "Speech check failed, not interrupting");
            false
        }
        Err(_) => {
            tracing::debug!(session_id, "Speech check timed out, not interrupting");
            false
        }
    }
}

/// One turn at a time; chunks arriving mid-turn wait in the channel
async fn run_turns(
    mut pipeline: TurnPipeline,
    session: Arc<Session>,
    mut inbound_rx: mpsc::Receiver<AudioInput>,
) {
    while let Some(input) = inbound_rx.recv().await {
        if !session.is_active() {
            break;
        }
        pipeline
            .handle_audio(&input.audio, &input.format, input.is_final)
            .await;
    }
    tracing::debug!(session_id = %session.id, "Turn task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voice_gateway_config::Settings;
    use voice_gateway_persistence::InMemoryConversationStore;
    use voice_gateway_pipeline::{
        Collaborators, EchoGenerator, EnergyValidator, FixedRecognizer, SilenceSynthesizer,
    };
    use voice_gateway_transport::OutboundEnvelope;

    fn app(transcript: &str) -> AppState {
        let mut settings = Settings::default();
        settings.pipeline.buffer_threshold_bytes = 3_200;
        let collaborators = Collaborators {
            recognizer: Arc::new(FixedRecognizer::new(transcript)),
            validator: Arc::new(EnergyValidator::default()),
            generator: Arc::new(EchoGenerator),
            synthesizer: Arc::new(SilenceSynthesizer::new(64)),
        };
        AppState::new(settings, Arc::new(InMemoryConversationStore::new()), collaborators)
    }

    fn connect(state: &AppState, buffer: usize) -> (Arc<Session>, mpsc::Receiver<OutboundEnvelope>) {
        let (conn, rx) = ChannelConnection::pair(buffer);
        (state.registry.connect(conn, "u").unwrap(), rx)
    }

    fn tone(samples: usize, amplitude: f32) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| {
                let v = ((i as f32 * 0.3).sin() * amplitude * 32767.0) as i16;
                v.to_le_bytes()
            })
            .collect()
    }

    fn audio_frame(session_id: &str, audio: Vec<u8>, is_final: bool) -> String {
        InboundEnvelope {
            session_id: Some(session_id.to_string()),
            message: InboundMessage::AudioChunk {
                audio,
                format: "pcm16".into(),
                is_final,
            },
        }
        .encode()
    }

    fn error_type(envelope: &OutboundEnvelope) -> Option<ErrorCategory> {
        match &envelope.message {
            OutboundMessage::Error { error_type, .. } => Some(*error_type),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_speech_during_response_raises_interrupt() {
        let state = app("hello");
        let (session, _rx) = connect(&state, 8);
        let (tx, mut inbound) = mpsc::channel(4);

        session.interrupt().begin_outbound();
        let frame = audio_frame(&session.id, tone(3_200, 0.5), false);
        handle_frame(&state, &session, &tx, &frame).await;

        assert!(session.interrupt().is_set());
        // The chunk still starts the next utterance
        assert!(inbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_audio_without_response_or_speech_does_not_interrupt() {
        let state = app("hello");
        let (session, _rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(4);

        // Nothing playing
        let frame = audio_frame(&session.id, tone(3_200, 0.5), false);
        handle_frame(&state, &session, &tx, &frame).await;
        assert!(!session.interrupt().is_set());

        // Playing, but the chunk is silent
        session.interrupt().begin_outbound();
        let frame = audio_frame(&session.id, vec![0; 6_400], false);
        handle_frame(&state, &session, &tx, &frame).await;
        assert!(!session.interrupt().is_set());
    }

    #[tokio::test]
    async fn test_talking_over_playback_stops_the_turn() {
        let words: Vec<String> = (0..30).map(|i| format!("w{i}")).collect();
        let state = app(&words.join(" "));
        // Small buffer so playback waits on the reader below
        let (session, mut rx) = connect(&state, 1);
        let (tx, _inbound) = mpsc::channel(4);

        let mut pipeline = session_pipeline(&state, &session);
        let turn = tokio::spawn(async move {
            pipeline.handle_audio(&tone(3_200, 0.5), "pcm16", true).await;
        });

        let mut events = Vec::new();
        while let Some(envelope) = rx.recv().await {
            let first_audio = matches!(envelope.message, OutboundMessage::TtsChunk { .. })
                && !events.contains(&"tts_chunk");
            events.push(envelope.message.event_name());
            if first_audio {
                let frame = audio_frame(&session.id, tone(3_200, 0.5), false);
                handle_frame(&state, &session, &tx, &frame).await;
            }
            if let OutboundMessage::StreamingInterrupted { total_chunks_sent } = &envelope.message {
                assert!(*total_chunks_sent < words.len() + 2);
                assert_eq!(
                    *total_chunks_sent,
                    events.iter().filter(|e| **e == "tts_chunk").count()
                );
                break;
            }
            assert_ne!(envelope.message.event_name(), "streaming_complete");
        }

        turn.await.unwrap();
        assert_eq!(events.last(), Some(&"streaming_interrupted"));
        assert_eq!(session.counters().interruptions(), 1);
        assert!(!session.interrupt().is_outbound());
    }

    #[tokio::test]
    async fn test_mismatched_session_id_is_rejected() {
        let state = app("hello");
        let (session, mut rx) = connect(&state, 8);
        let (tx, mut inbound) = mpsc::channel(4);

        let frame = audio_frame("someone-else", tone(3_200, 0.5), true);
        handle_frame(&state, &session, &tx, &frame).await;

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.session_id, session.id);
        assert_eq!(error_type(&reply), Some(ErrorCategory::InvalidSession));
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_inbound_buffer_reports_queue_full() {
        let state = app("hello");
        let (session, mut rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(1);

        let frame = audio_frame(&session.id, vec![0; 64], false);
        handle_frame(&state, &session, &tx, &frame).await;
        assert!(rx.try_recv().is_err());

        handle_frame(&state, &session, &tx, &frame).await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(error_type(&reply), Some(ErrorCategory::QueueFull));
    }

    #[tokio::test]
    async fn test_malformed_and_binary_frames_are_invalid() {
        let state = app("hello");
        let (session, mut rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(4);

        handle_frame(&state, &session, &tx, "not json").await;
        assert_eq!(error_type(&rx.try_recv().unwrap()), Some(ErrorCategory::InvalidMessage));

        handle_frame(&state, &session, &tx, r#"{"event":"dance","data":{}}"#).await;
        assert_eq!(error_type(&rx.try_recv().unwrap()), Some(ErrorCategory::InvalidMessage));

        let flow = handle_message(&state, &session, &tx, Message::Binary(vec![1, 2, 3])).await;
        assert!(flow.is_continue());
        assert_eq!(error_type(&rx.try_recv().unwrap()), Some(ErrorCategory::InvalidMessage));
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_test_event_is_echoed() {
        let state = app("hello");
        let (session, mut rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(4);

        let frame = serde_json::json!({
            "event": "test",
            "data": { "session_id": session.id, "ping": 1 },
        })
        .to_string();
        handle_frame(&state, &session, &tx, &frame).await;

        let reply = rx.try_recv().unwrap();
        assert_eq!(
            reply.message,
            OutboundMessage::TestResponse {
                echo: serde_json::json!({ "ping": 1 })
            }
        );
    }

    #[tokio::test]
    async fn test_frames_refresh_heartbeat() {
        let state = app("hello");
        let (session, _rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(4);

        let before = session.last_heartbeat_at();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let frame = serde_json::json!({ "event": "heartbeat", "data": {} }).to_string();
        handle_frame(&state, &session, &tx, &frame).await;
        let after_text = session.last_heartbeat_at();
        assert!(after_text > before);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let flow = handle_message(&state, &session, &tx, Message::Ping(Vec::new())).await;
        assert!(flow.is_continue());
        assert!(session.last_heartbeat_at() > after_text);
    }

    #[tokio::test]
    async fn test_close_ends_read_loop() {
        let state = app("hello");
        let (session, _rx) = connect(&state, 8);
        let (tx, _inbound) = mpsc::channel(4);

        let flow = handle_message(&state, &session, &tx, Message::Close(None)).await;
        assert!(flow.is_break());
    }
}
