//! Adapters wiring a turn pipeline to the registry and durability queue

use std::sync::Arc;

use async_trait::async_trait;
use voice_gateway_core::Turn;
use voice_gateway_persistence::{DurabilityQueue, QueueItem};
use voice_gateway_pipeline::{OutboundSink, TurnRecorder};
use voice_gateway_transport::OutboundMessage;

use crate::session::SessionRegistry;

/// Routes one session's pipeline output through [`SessionRegistry::send`]
pub struct SessionOutlet {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl SessionOutlet {
    pub fn new(registry: Arc<SessionRegistry>, session_id: impl Into<String>) -> Self {
        Self {
            registry,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl OutboundSink for SessionOutlet {
    async fn send(&self, message: OutboundMessage) {
        self.registry.send(&self.session_id, message).await;
    }
}

/// Hands finished turns to the durability queue
pub struct QueueRecorder {
    queue: Arc<DurabilityQueue>,
}

impl QueueRecorder {
    pub fn new(queue: Arc<DurabilityQueue>) -> Self {
        Self { queue }
    }
}

impl TurnRecorder for QueueRecorder {
    fn record(&self, turn: Turn) {
        let key = turn.storage_key();
        if let Err(e) = self.queue.enqueue(QueueItem::Turn(turn)) {
            tracing::debug!(turn = %key, error = %e, "Turn not queued");
        }
    }
}
