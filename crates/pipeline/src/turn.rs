//! Per-session turn state machine
//!
//! One [`TurnPipeline`] runs per session, owned by that session's turn task.
//! A turn moves through
//!
//! ```text
//! Idle -> Buffering -> Recognizing -> Generating -> Synthesizing -> Idle
//!                                          \              /
//!                                           -> Interrupted
//! ```
//!
//! The [`InterruptFlag`] is checked before every outbound chunk. Any
//! collaborator failure becomes an `error` event and the machine resets to
//! `Idle`; the session itself keeps running.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;
use voice_gateway_config::PipelineConfig;
use voice_gateway_core::{
    AudioFormat, CoreError, ResponseGenerator, SpeechRecognizer, SpeechSynthesizer,
    SpeechValidator, Turn, TurnRole,
};
use voice_gateway_transport::{OutboundMessage, VadStatus};

use crate::buffer::AudioBuffer;
use crate::interrupt::InterruptFlag;
use crate::segmenter::{SegmenterConfig, TextSegmenter};
use crate::PipelineError;

/// Where the pipeline writes client-bound messages for its session
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Best effort; delivery failures are handled by the sink's owner
    async fn send(&self, message: OutboundMessage);
}

/// Where finished turns go for durable recording
pub trait TurnRecorder: Send + Sync {
    /// Must not block
    fn record(&self, turn: Turn);
}

/// External engines used by every pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub validator: Arc<dyn SpeechValidator>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Session counters written only by the pipeline
#[derive(Debug, Default)]
pub struct TurnCounters {
    turns: AtomicU32,
    interruptions: AtomicU32,
}

impl TurnCounters {
    pub fn turns(&self) -> u32 {
        self.turns.load(Ordering::Relaxed)
    }

    pub fn interruptions(&self) -> u32 {
        self.interruptions.load(Ordering::Relaxed)
    }
}

/// Turn state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Buffering,
    Recognizing,
    Generating,
    Synthesizing,
    Interrupted,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Buffering => "buffering",
            Self::Recognizing => "recognizing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    NoSpeech,
    Completed,
    Interrupted,
}

/// What one turn produced so far
#[derive(Debug, Default)]
struct Exchange {
    transcript: Option<String>,
    response: String,
    chunks_sent: usize,
}

/// Drives conversational turns for a single session
pub struct TurnPipeline {
    session_id: String,
    user_id: String,
    config: PipelineConfig,
    collaborators: Collaborators,
    outbound: Arc<dyn OutboundSink>,
    recorder: Arc<dyn TurnRecorder>,
    interrupt: InterruptFlag,
    counters: Arc<TurnCounters>,
    buffer: AudioBuffer,
    state: TurnState,
    next_sequence: u64,
}

impl TurnPipeline {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        config: PipelineConfig,
        collaborators: Collaborators,
        outbound: Arc<dyn OutboundSink>,
        recorder: Arc<dyn TurnRecorder>,
    ) -> Self {
        let buffer = AudioBuffer::new(config.buffer_threshold_bytes, config.max_buffer_bytes);
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            config,
            collaborators,
            outbound,
            recorder,
            interrupt: InterruptFlag::new(),
            counters: Arc::new(TurnCounters::default()),
            buffer,
            state: TurnState::Idle,
            next_sequence: 1,
        }
    }

    /// Share an interrupt flag owned by the session
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Share counters owned by the session
    pub fn with_counters(mut self, counters: Arc<TurnCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn counters(&self) -> Arc<TurnCounters> {
        self.counters.clone()
    }

    /// Feed one inbound audio chunk; runs a full turn once the utterance is ready
    pub async fn handle_audio(&mut self, audio: &[u8], format: &str, is_final: bool) {
        if self.state == TurnState::Idle {
            self.transition(TurnState::Buffering);
        }

        let buffered = match self.buffer.push(audio, format) {
            Ok(len) => len,
            Err(e) => {
                self.fail(&e).await;
                return;
            }
        };

        if !self.buffer.is_ready(is_final) {
            if is_final {
                self.emit(OutboundMessage::AudioReceived {
                    vad_status: VadStatus::NoSpeech,
                    bytes_buffered: 0,
                })
                .await;
                self.transition(TurnState::Idle);
            } else {
                self.emit(OutboundMessage::AudioReceived {
                    vad_status: VadStatus::Buffering,
                    bytes_buffered: buffered,
                })
                .await;
            }
            return;
        }

        if let Some((utterance, format)) = self.buffer.take() {
            self.run_turn(utterance, format).await;
        }
    }

    async fn run_turn(&mut self, audio: Vec<u8>, format: AudioFormat) {
        let started = Instant::now();
        let mut exchange = Exchange::default();

        let result = self.drive(&audio, &format, &mut exchange).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Outcome::NoSpeech) => {
                tracing::debug!(session_id = %self.session_id, "No speech in utterance");
            }
            Ok(Outcome::Completed) => {
                self.emit(OutboundMessage::StreamingComplete {
                    total_chunks_sent: exchange.chunks_sent,
                })
                .await;
                self.record(&exchange, elapsed_ms, None);
                metrics::histogram!("voice_gateway_turn_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
            }
            Ok(Outcome::Interrupted) => {
                self.transition(TurnState::Interrupted);
                self.emit(OutboundMessage::StreamingInterrupted {
                    total_chunks_sent: exchange.chunks_sent,
                })
                .await;
                self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voice_gateway_interruptions_total").increment(1);
                tracing::info!(
                    session_id = %self.session_id,
                    chunks_sent = exchange.chunks_sent,
                    "Turn interrupted"
                );
                self.record(&exchange, elapsed_ms, None);
            }
            Err(e) => {
                self.fail(&e).await;
                self.record(&exchange, elapsed_ms, Some(e.to_string()));
            }
        }

        self.interrupt.end_outbound();
        self.interrupt.clear();
        self.transition(TurnState::Idle);
    }

    async fn drive(
        &mut self,
        audio: &[u8],
        format: &AudioFormat,
        exchange: &mut Exchange,
    ) -> Result<Outcome, PipelineError> {
        self.transition(TurnState::Recognizing);

        let recognition_timeout = self.config.recognition_timeout();
        let has_speech = call(
            "validation",
            recognition_timeout,
            self.collaborators.validator.contains_speech(audio, format),
        )
        .await?;
        if !has_speech {
            self.no_speech().await;
            return Ok(Outcome::NoSpeech);
        }

        self.emit(OutboundMessage::AudioReceived {
            vad_status: VadStatus::Speech,
            bytes_buffered: audio.len(),
        })
        .await;

        let transcript = call(
            "recognition",
            recognition_timeout,
            self.collaborators.recognizer.transcribe(audio, format),
        )
        .await?;
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            self.no_speech().await;
            return Ok(Outcome::NoSpeech);
        }

        tracing::debug!(session_id = %self.session_id, transcript = %transcript, "Recognized");
        exchange.transcript = Some(transcript.clone());
        self.emit(OutboundMessage::Transcription {
            text: transcript.clone(),
        })
        .await;

        // New outbound turn
        self.interrupt.clear();
        self.interrupt.begin_outbound();
        self.transition(TurnState::Generating);

        let generation_timeout = self.config.generation_timeout();
        let mut segmenter = TextSegmenter::new(SegmenterConfig {
            max_chars: self.config.segment_max_chars,
            min_chars: self.config.segment_min_chars,
        });
        let generator = self.collaborators.generator.clone();

        if self.config.streaming_generation {
            let mut stream = call(
                "generation",
                generation_timeout,
                generator.generate_stream(&transcript, &self.user_id, &self.session_id),
            )
            .await?;

            let mut chunk_index = 0;
            loop {
                let next = tokio::time::timeout(generation_timeout, stream.next())
                    .await
                    .map_err(|_| timed_out("generation", generation_timeout))?;
                let Some(fragment) = next else {
                    break;
                };
                let fragment = fragment?;

                if self.interrupt.is_set() {
                    return Ok(Outcome::Interrupted);
                }

                exchange.response.push_str(&fragment);
                self.emit(OutboundMessage::AgentResponseChunk {
                    text: fragment.clone(),
                    chunk_index,
                })
                .await;
                chunk_index += 1;

                segmenter.push(&fragment);
                while let Some(segment) = segmenter.next_segment() {
                    if self.speak(&segment, exchange).await? == Outcome::Interrupted {
                        return Ok(Outcome::Interrupted);
                    }
                    self.transition(TurnState::Generating);
                }
            }
        } else {
            let reply = call(
                "generation",
                generation_timeout,
                generator.generate(&transcript, &self.user_id, &self.session_id),
            )
            .await?;
            exchange.response = reply;
            segmenter.push(&exchange.response);
        }

        self.emit(OutboundMessage::AgentResponse {
            text: exchange.response.clone(),
        })
        .await;

        for segment in segmenter.finish() {
            if self.speak(&segment, exchange).await? == Outcome::Interrupted {
                return Ok(Outcome::Interrupted);
            }
        }

        Ok(Outcome::Completed)
    }

    /// Synthesize one segment, stopping at the first chunk after an interrupt
    async fn speak(
        &mut self,
        segment: &str,
        exchange: &mut Exchange,
    ) -> Result<Outcome, PipelineError> {
        self.transition(TurnState::Synthesizing);

        let synthesis_timeout = self.config.synthesis_timeout();
        let synthesizer = self.collaborators.synthesizer.clone();
        let mut audio = call(
            "synthesis",
            synthesis_timeout,
            synthesizer.synthesize(segment),
        )
        .await?;

        loop {
            let next = tokio::time::timeout(synthesis_timeout, audio.next())
                .await
                .map_err(|_| timed_out("synthesis", synthesis_timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            if self.interrupt.is_set() {
                return Ok(Outcome::Interrupted);
            }

            self.emit(OutboundMessage::tts_chunk(
                &chunk,
                exchange.chunks_sent,
                synthesizer.output_format(),
            ))
            .await;
            exchange.chunks_sent += 1;
        }

        Ok(Outcome::Completed)
    }

    /// Enqueue the user and agent turns. Nothing is recorded without a transcript.
    fn record(&mut self, exchange: &Exchange, elapsed_ms: u64, error: Option<String>) {
        let Some(transcript) = &exchange.transcript else {
            return;
        };

        let sequence = self.next_sequence;
        self.next_sequence += 2;

        let user = Turn::new(&self.session_id, sequence, TurnRole::User, transcript.clone());
        let mut agent = Turn::new(
            &self.session_id,
            sequence + 1,
            TurnRole::Agent,
            exchange.response.clone(),
        )
        .with_processing_time(elapsed_ms);
        if let Some(error) = error {
            agent = agent.with_error(error);
        }

        self.recorder.record(user);
        self.recorder.record(agent);
        self.counters.turns.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("voice_gateway_turns_total").increment(1);
    }

    async fn no_speech(&self) {
        self.emit(OutboundMessage::AudioReceived {
            vad_status: VadStatus::NoSpeech,
            bytes_buffered: 0,
        })
        .await;
    }

    async fn fail(&mut self, error: &PipelineError) {
        tracing::warn!(
            session_id = %self.session_id,
            state = self.state.as_str(),
            error = %error,
            "Turn failed"
        );
        metrics::counter!("voice_gateway_turn_errors_total", "category" => error.category().as_str())
            .increment(1);

        self.emit(OutboundMessage::error(error.category(), error.to_string()))
            .await;
        self.buffer.clear();
        self.transition(TurnState::Idle);
    }

    async fn emit(&self, message: OutboundMessage) {
        self.outbound.send(message).await;
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            tracing::trace!(
                session_id = %self.session_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Turn state"
            );
            self.state = next;
        }
    }
}

fn timed_out(stage: &'static str, limit: Duration) -> PipelineError {
    CoreError::Timeout {
        stage,
        timeout_ms: limit.as_millis() as u64,
    }
    .into()
}

/// Await a collaborator call under a timeout, recording its latency
async fn call<T, F>(stage: &'static str, limit: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = voice_gateway_core::Result<T>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(timed_out(stage, limit)),
    };
    metrics::histogram!("voice_gateway_stage_latency_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple::{EchoGenerator, FixedRecognizer, SilenceSynthesizer};
    use parking_lot::Mutex;
    use voice_gateway_core::{AudioStream, ErrorCategory, Result as CoreResult};

    struct Accept(bool);

    #[async_trait]
    impl SpeechValidator for Accept {
        async fn contains_speech(&self, _audio: &[u8], _format: &AudioFormat) -> CoreResult<bool> {
            Ok(self.0)
        }
    }

    struct BrokenSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for BrokenSynthesizer {
        async fn synthesize(&self, _text: &str) -> CoreResult<AudioStream> {
            Err(CoreError::Synthesis("engine offline".into()))
        }
    }

    struct SlowRecognizer;

    #[async_trait]
    impl SpeechRecognizer for SlowRecognizer {
        async fn transcribe(&self, _audio: &[u8], _format: &AudioFormat) -> CoreResult<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    /// Collects messages; optionally raises the interrupt after N audio chunks
    #[derive(Default)]
    struct CollectingSink {
        messages: Mutex<Vec<OutboundMessage>>,
        interrupt_after: Option<(InterruptFlag, usize)>,
    }

    impl CollectingSink {
        fn events(&self) -> Vec<&'static str> {
            self.messages.lock().iter().map(|m| m.event_name()).collect()
        }

        fn last(&self) -> Option<OutboundMessage> {
            self.messages.lock().last().cloned()
        }

        fn tts_chunks(&self) -> usize {
            self.messages
                .lock()
                .iter()
                .filter(|m| matches!(m, OutboundMessage::TtsChunk { .. }))
                .count()
        }
    }

    #[async_trait]
    impl OutboundSink for CollectingSink {
        async fn send(&self, message: OutboundMessage) {
            let is_audio = matches!(message, OutboundMessage::TtsChunk { .. });
            let mut messages = self.messages.lock();
            messages.push(message);
            if let (true, Some((flag, after))) = (is_audio, &self.interrupt_after) {
                let sent = messages
                    .iter()
                    .filter(|m| matches!(m, OutboundMessage::TtsChunk { .. }))
                    .count();
                if sent == *after {
                    flag.set();
                }
            }
        }
    }

    #[derive(Default)]
    struct CollectingRecorder {
        turns: Mutex<Vec<Turn>>,
    }

    impl TurnRecorder for CollectingRecorder {
        fn record(&self, turn: Turn) {
            self.turns.lock().push(turn);
        }
    }

    fn collaborators(transcript: &str) -> Collaborators {
        Collaborators {
            recognizer: Arc::new(FixedRecognizer::new(transcript)),
            validator: Arc::new(Accept(true)),
            generator: Arc::new(EchoGenerator),
            synthesizer: Arc::new(SilenceSynthesizer::new(4)),
        }
    }

    fn pipeline(
        session_id: &str,
        collaborators: Collaborators,
        sink: Arc<CollectingSink>,
        recorder: Arc<CollectingRecorder>,
    ) -> TurnPipeline {
        TurnPipeline::new(
            session_id,
            "user",
            PipelineConfig::default(),
            collaborators,
            sink,
            recorder,
        )
    }

    #[tokio::test]
    async fn test_full_turn_records_user_and_agent() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = pipeline("s1", collaborators("hello there"), sink.clone(), recorder.clone());

        p.handle_audio(&[1, 2, 3, 4], "pcm16", true).await;

        let events = sink.events();
        assert_eq!(events.first(), Some(&"audio_received"));
        assert!(events.contains(&"transcription"));
        assert!(events.contains(&"agent_response_chunk"));
        assert!(events.contains(&"agent_response"));
        assert_eq!(
            sink.last(),
            Some(OutboundMessage::StreamingComplete {
                total_chunks_sent: sink.tts_chunks()
            })
        );

        let turns = recorder.turns.lock();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].sequence, turns[0].role), (1, TurnRole::User));
        assert_eq!((turns[1].sequence, turns[1].role), (2, TurnRole::Agent));
        assert_eq!(turns[1].content, "You said: hello there");
        assert_eq!(p.counters().turns(), 1);
        assert_eq!(p.state(), TurnState::Idle);
    }

    /// Notes whether the outbound marker was up when each message went out
    struct MarkerSink {
        flag: InterruptFlag,
        seen: Mutex<Vec<(&'static str, bool)>>,
    }

    #[async_trait]
    impl OutboundSink for MarkerSink {
        async fn send(&self, message: OutboundMessage) {
            self.seen
                .lock()
                .push((message.event_name(), self.flag.is_outbound()));
        }
    }

    #[tokio::test]
    async fn test_outbound_marker_spans_response() {
        let flag = InterruptFlag::new();
        let sink = Arc::new(MarkerSink {
            flag: flag.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = TurnPipeline::new(
            "s1",
            "user",
            PipelineConfig::default(),
            collaborators("hello there"),
            sink.clone(),
            recorder,
        )
        .with_interrupt(flag.clone());

        p.handle_audio(&[1, 2, 3, 4], "pcm16", true).await;

        let seen = sink.seen.lock();
        for (event, outbound) in seen.iter() {
            match *event {
                "audio_received" | "transcription" => assert!(!outbound, "{event}"),
                "agent_response_chunk" | "agent_response" | "tts_chunk"
                | "streaming_complete" => assert!(outbound, "{event}"),
                _ => {}
            }
        }
        assert!(seen.iter().any(|(e, _)| *e == "tts_chunk"));
        assert!(!flag.is_outbound());
    }

    #[tokio::test]
    async fn test_interrupt_stops_within_one_chunk() {
        let flag = InterruptFlag::new();
        let sink = Arc::new(CollectingSink {
            messages: Mutex::new(Vec::new()),
            interrupt_after: Some((flag.clone(), 3)),
        });
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = pipeline(
            "s1",
            collaborators("one two three four five six seven"),
            sink.clone(),
            recorder.clone(),
        )
        .with_interrupt(flag.clone());

        p.handle_audio(&[0; 8], "pcm16", true).await;

        assert_eq!(sink.tts_chunks(), 3);
        assert_eq!(
            sink.last(),
            Some(OutboundMessage::StreamingInterrupted {
                total_chunks_sent: 3
            })
        );
        assert!(!sink.events().contains(&"streaming_complete"));
        assert_eq!(p.counters().interruptions(), 1);
        assert!(!flag.is_set(), "flag cleared for the next turn");
        assert_eq!(recorder.turns.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_interrupt_does_not_cancel_next_turn() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = pipeline("s1", collaborators("hi"), sink.clone(), recorder);

        p.interrupt_flag().set();
        p.handle_audio(&[0; 8], "pcm16", true).await;

        assert!(sink.events().contains(&"streaming_complete"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_no_speech() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = pipeline("s1", collaborators("   "), sink.clone(), recorder.clone());

        p.handle_audio(&[0; 8], "wav", true).await;

        assert_eq!(
            sink.last(),
            Some(OutboundMessage::AudioReceived {
                vad_status: VadStatus::NoSpeech,
                bytes_buffered: 0
            })
        );
        assert!(!sink.events().contains(&"transcription"));
        assert!(recorder.turns.lock().is_empty());
        assert_eq!(p.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_silent_audio_skips_recognition() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut collab = collaborators("should not appear");
        collab.validator = Arc::new(Accept(false));
        let mut p = pipeline("s1", collab, sink.clone(), recorder.clone());

        p.handle_audio(&[0; 8], "pcm16", true).await;

        assert_eq!(sink.events(), vec!["audio_received"]);
        assert!(recorder.turns.lock().is_empty());
    }

    #[tokio::test]
    async fn test_buffers_until_threshold() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut config = PipelineConfig::default();
        config.buffer_threshold_bytes = 8;
        let mut p = TurnPipeline::new(
            "s1",
            "user",
            config,
            collaborators("hi"),
            sink.clone(),
            recorder.clone(),
        );

        p.handle_audio(&[0; 4], "pcm16", false).await;
        assert_eq!(
            sink.last(),
            Some(OutboundMessage::AudioReceived {
                vad_status: VadStatus::Buffering,
                bytes_buffered: 4
            })
        );
        assert_eq!(p.state(), TurnState::Buffering);

        p.handle_audio(&[0; 4], "pcm16", false).await;
        assert!(sink.events().contains(&"streaming_complete"));
        assert_eq!(recorder.turns.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_error_resets_and_session_survives() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut collab = collaborators("hello");
        collab.synthesizer = Arc::new(BrokenSynthesizer);
        let mut p = pipeline("s1", collab.clone(), sink.clone(), recorder.clone());

        p.handle_audio(&[0; 8], "pcm16", true).await;

        assert!(matches!(
            sink.last(),
            Some(OutboundMessage::Error { error_type: ErrorCategory::SynthesisFailure, .. })
        ));
        assert_eq!(p.state(), TurnState::Idle);
        {
            let turns = recorder.turns.lock();
            assert_eq!(turns.len(), 2);
            assert!(turns[1].error.is_some());
        }

        // Next turn on the same pipeline still runs
        p.handle_audio(&[0; 8], "pcm16", true).await;
        let turns = recorder.turns.lock();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].sequence, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_timeout() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut collab = collaborators("");
        collab.recognizer = Arc::new(SlowRecognizer);
        let mut p = pipeline("s1", collab, sink.clone(), recorder.clone());

        p.handle_audio(&[0; 8], "pcm16", true).await;

        match sink.last() {
            Some(OutboundMessage::Error { error_type, message }) => {
                assert_eq!(error_type, ErrorCategory::Timeout);
                assert!(message.contains("recognition"));
            }
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(recorder.turns.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_format_is_invalid_message() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut p = pipeline("s1", collaborators("hi"), sink.clone(), recorder);

        p.handle_audio(&[0; 8], "flac", true).await;

        assert!(matches!(
            sink.last(),
            Some(OutboundMessage::Error { error_type: ErrorCategory::InvalidMessage, .. })
        ));
        assert_eq!(p.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_single_shot_generation() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = Arc::new(CollectingRecorder::default());
        let mut config = PipelineConfig::default();
        config.streaming_generation = false;
        let mut p = TurnPipeline::new(
            "s1",
            "user",
            config,
            collaborators("hi"),
            sink.clone(),
            recorder,
        );

        p.handle_audio(&[0; 8], "pcm16", true).await;

        let events = sink.events();
        assert!(!events.contains(&"agent_response_chunk"));
        assert!(events.contains(&"agent_response"));
        assert!(events.contains(&"streaming_complete"));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        let flag_a = InterruptFlag::new();
        let sink_a = Arc::new(CollectingSink {
            messages: Mutex::new(Vec::new()),
            interrupt_after: Some((flag_a.clone(), 1)),
        });
        let sink_b = Arc::new(CollectingSink::default());
        let recorder_a = Arc::new(CollectingRecorder::default());
        let recorder_b = Arc::new(CollectingRecorder::default());

        let mut a = pipeline("a", collaborators("one two three"), sink_a.clone(), recorder_a.clone())
            .with_interrupt(flag_a);
        let mut b = pipeline("b", collaborators("four five six"), sink_b.clone(), recorder_b.clone());

        tokio::join!(
            a.handle_audio(&[0; 8], "pcm16", true),
            b.handle_audio(&[0; 8], "pcm16", true),
        );

        assert!(sink_a.events().contains(&"streaming_interrupted"));
        assert!(sink_b.events().contains(&"streaming_complete"));
        assert!(!sink_b.events().contains(&"streaming_interrupted"));

        assert!(recorder_a.turns.lock().iter().all(|t| t.session_id == "a"));
        assert!(recorder_b.turns.lock().iter().all(|t| t.session_id == "b"));
        assert_eq!(b.counters().interruptions(), 0);
    }
}
