//! Voice Gateway Transport Layer
//!
//! Provides:
//! - The JSON envelope exchanged over the persistent connection
//! - A connection abstraction owned by the session registry
//! - A channel-backed connection used by the WebSocket writer and by tests

pub mod channel;
pub mod protocol;
pub mod traits;

pub use channel::ChannelConnection;
pub use protocol::{InboundEnvelope, InboundMessage, OutboundEnvelope, OutboundMessage, VadStatus};
pub use traits::Connection;

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}
