//! Persistence layer for the voice gateway
//!
//! Provides:
//! - The [`ConversationStore`] trait with ScyllaDB and in-memory adapters
//! - The [`DurabilityQueue`] that keeps store latency off the live path
//! - The shared [`RetryPolicy`]

pub mod client;
pub mod error;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod schema;
pub mod sessions;

use std::sync::Arc;

pub use client::ScyllaClient;
pub use error::PersistenceError;
pub use memory::InMemoryConversationStore;
pub use queue::{
    DeadLetterSink, DurabilityQueue, EnqueueError, LoggingDeadLetter, QueueItem,
    QueueStatsSnapshot,
};
pub use retry::RetryPolicy;
pub use sessions::{
    ConversationStore, ScyllaConversationStore, SessionEnd, SessionRecord, SessionStart,
};

use voice_gateway_config::{PersistenceBackend, PersistenceConfig};

/// Build the configured conversation store
///
/// The Scylla backend connects and creates its keyspace and tables first.
pub async fn init(config: &PersistenceConfig) -> Result<Arc<dyn ConversationStore>, PersistenceError> {
    match config.backend {
        PersistenceBackend::Memory => {
            tracing::info!("Using in-memory conversation store");
            Ok(Arc::new(InMemoryConversationStore::new()))
        }
        PersistenceBackend::Scylla => {
            let client = ScyllaClient::connect(config).await?;
            client.ensure_schema().await?;
            Ok(Arc::new(ScyllaConversationStore::new(client)))
        }
    }
}
