//! Transport Traits
//!
//! Abstract interface for the client connection owned by the session registry.

use async_trait::async_trait;

use crate::{OutboundEnvelope, TransportError};

/// Write half of a client connection.
///
/// Only the session registry holds one of these; everything else writes
/// through the registry.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one frame to the client
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError>;

    /// Whether the peer is still reachable
    fn is_connected(&self) -> bool;

    /// Stop delivering frames. Idempotent.
    async fn close(&self);
}
