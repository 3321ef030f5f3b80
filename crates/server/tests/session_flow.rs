//! Registry, pipeline and durability queue wired together the way the
//! WebSocket handler wires them.

use std::sync::Arc;

use tokio::sync::mpsc;

use voice_gateway_config::Settings;
use voice_gateway_core::TurnRole;
use voice_gateway_persistence::InMemoryConversationStore;
use voice_gateway_pipeline::TurnPipeline;
use voice_gateway_server::state::default_collaborators;
use voice_gateway_server::{AppState, QueueRecorder, Session, SessionOutlet};
use voice_gateway_transport::{ChannelConnection, OutboundEnvelope, OutboundMessage};

fn app() -> (AppState, Arc<InMemoryConversationStore>) {
    let mut settings = Settings::default();
    settings.pipeline.buffer_threshold_bytes = 3_200;
    let store = Arc::new(InMemoryConversationStore::new());
    let collaborators = default_collaborators(&settings.pipeline);
    (AppState::new(settings, store.clone(), collaborators), store)
}

fn connect(state: &AppState, user: &str) -> (Arc<Session>, mpsc::Receiver<OutboundEnvelope>) {
    let (conn, rx) = ChannelConnection::pair(256);
    let session = state.registry.connect(conn, user).unwrap();
    (session, rx)
}

fn pipeline(state: &AppState, session: &Arc<Session>) -> TurnPipeline {
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

/// 0.2s of a loud 16-bit tone
fn speech() -> Vec<u8> {
    (0..3_200)
        .flat_map(|i| {
            let v = ((i as f32 * 0.3).sin() * 0.5 * 32767.0) as i16;
            v.to_le_bytes()
        })
        .collect()
}

fn drain(rx: &mut mpsc::Receiver<OutboundEnvelope>) -> Vec<OutboundEnvelope> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_turn_reaches_only_its_session_and_is_persisted() {
    let (state, store) = app();
    let (alice, mut alice_rx) = connect(&state, "alice");
    let (bob, mut bob_rx) = connect(&state, "bob");

    let mut p = pipeline(&state, &alice);
    p.handle_audio(&speech(), "pcm16", true).await;

    let frames = drain(&mut alice_rx);
    assert!(frames.iter().all(|f| f.session_id == alice.id));

    let events: Vec<&str> = frames.iter().map(|f| f.message.event_name()).collect();
    assert!(events.contains(&"transcription"));
    assert!(events.contains(&"agent_response"));
    assert!(events.contains(&"tts_chunk"));
    assert_eq!(events.last(), Some(&"streaming_complete"));
    assert!(frames.iter().any(|f| f.message
        == OutboundMessage::Transcription {
            text: "hello".into()
        }));

    assert!(drain(&mut bob_rx).is_empty());
    assert_eq!(alice.counters().turns(), 1);
    assert_eq!(bob.counters().turns(), 0);

    state.registry.disconnect(&alice.id, "client_disconnect").await;
    state.queue.drain_and_stop().await;

    let turns = store.turns(&alice.id);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].content, "hello");
    assert_eq!(turns[1].role, TurnRole::Agent);
    assert_eq!(turns[1].content, "You said: hello");
    assert!(store.turns(&bob.id).is_empty());

    let ended = store.end_records(&alice.id);
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].turn_count, 1);
}

#[tokio::test]
async fn test_racing_disconnects_end_session_once() {
    let (state, store) = app();
    let (session, _rx) = connect(&state, "carol");

    let (a, b, c) = tokio::join!(
        state.registry.disconnect(&session.id, "client_disconnect"),
        state.registry.disconnect(&session.id, "heartbeat_timeout"),
        state.registry.disconnect(&session.id, "api_request"),
    );
    assert_eq!([a, b, c].iter().filter(|ended| **ended).count(), 1);

    state.queue.drain_and_stop().await;
    assert_eq!(store.end_records(&session.id).len(), 1);
    assert!(!store.session(&session.id).unwrap().is_active);
}

#[tokio::test]
async fn test_shutdown_ends_every_session_before_drain() {
    let (state, store) = app();
    let ids: Vec<String> = (0..5)
        .map(|i| connect(&state, &format!("user-{i}")).0.id.clone())
        .collect();

    assert_eq!(state.registry.disconnect_all("server_shutdown").await, 5);
    state.queue.drain_and_stop().await;

    for id in &ids {
        let ended = store.end_records(id);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].reason, "server_shutdown");
    }
    assert!(!state.queue.is_accepting());
    assert_eq!(state.queue.stats().dropped, 0);
}

#[tokio::test]
async fn test_stale_interrupt_is_cleared_by_new_turn() {
    let (state, _store) = app();
    let (session, mut rx) = connect(&state, "dave");

    // Raised before the turn starts; the new transcription clears it
    session.interrupt().set();
    let mut p = pipeline(&state, &session);
    p.handle_audio(&speech(), "pcm16", true).await;

    let frames = drain(&mut rx);
    assert_eq!(
        frames.last().map(|f| f.message.event_name()),
        Some("streaming_complete")
    );
    assert_eq!(session.counters().interruptions(), 0);
    assert!(!session.interrupt().is_set());
}
