//! Channel-backed connection
//!
//! The WebSocket handler drains the receiving end into the socket; tests read
//! it directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Connection, OutboundEnvelope, TransportError};

/// Connection that forwards frames into a bounded channel
pub struct ChannelConnection {
    tx: mpsc::Sender<OutboundEnvelope>,
    connected: AtomicBool,
}

impl ChannelConnection {
    /// Create a connection and the receiver that drains it
    pub fn pair(buffer: usize) -> (Arc<Self>, mpsc::Receiver<OutboundEnvelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        let connection = Arc::new(Self {
            tx,
            connected: AtomicBool::new(true),
        });
        (connection, rx)
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }

        self.tx.send(envelope).await.map_err(|_| {
            self.connected.store(false, Ordering::Release);
            TransportError::ConnectionClosed
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::debug!("Channel connection closed");
        }
    }
}
