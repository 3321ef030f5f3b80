//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use voice_gateway_config::{PipelineConfig, Settings};
use voice_gateway_persistence::{
    ConversationStore, DurabilityQueue, LoggingDeadLetter, RetryPolicy,
};
use voice_gateway_pipeline::{
    Collaborators, EchoGenerator, EnergyValidator, FixedRecognizer, SilenceSynthesizer,
};

use crate::reaper::HeartbeatReaper;
use crate::session::SessionRegistry;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub settings: Arc<Settings>,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Durable write path
    pub queue: Arc<DurabilityQueue>,
    /// Store behind the queue, also read by the reaper
    pub store: Arc<dyn ConversationStore>,
    /// External engines for every turn pipeline
    pub collaborators: Collaborators,
}

impl AppState {
    /// Start the durability queue and build the registry around it
    pub fn new(
        settings: Settings,
        store: Arc<dyn ConversationStore>,
        collaborators: Collaborators,
    ) -> Self {
        let queue = DurabilityQueue::start(
            &settings.durability,
            store.clone(),
            Arc::new(LoggingDeadLetter),
        );
        let registry = SessionRegistry::new(&settings.session, &settings.server, queue.clone());

        Self {
            settings: Arc::new(settings),
            registry,
            queue,
            store,
            collaborators,
        }
    }

    /// Heartbeat reaper configured from the session and durability settings
    pub fn reaper(&self) -> Arc<HeartbeatReaper> {
        HeartbeatReaper::new(
            self.registry.clone(),
            self.store.clone(),
            RetryPolicy::from(&self.settings.durability),
            self.settings.session.heartbeat_timeout(),
            self.settings.session.heartbeat_check_interval(),
        )
    }
}

/// Built-in backends used when no external engines are wired in
pub fn default_collaborators(pipeline: &PipelineConfig) -> Collaborators {
    Collaborators {
        recognizer: Arc::new(FixedRecognizer::new("hello")),
        validator: Arc::new(EnergyValidator::new(pipeline.silence_energy_floor_db)),
        generator: Arc::new(EchoGenerator),
        synthesizer: Arc::new(SilenceSynthesizer::default()),
    }
}
