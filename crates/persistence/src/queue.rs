//! Non-blocking durability queue
//!
//! Producers on the live path call [`DurabilityQueue::enqueue`], which never
//! waits. A single worker task drains the bounded channel in FIFO order and
//! writes each item to the [`ConversationStore`] under a [`RetryPolicy`].
//! Items that exhaust their attempts go to a [`DeadLetterSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use voice_gateway_config::DurabilityConfig;
use voice_gateway_core::Turn;

use crate::{ConversationStore, PersistenceError, RetryPolicy, SessionEnd, SessionStart};

/// One pending write
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    SessionStarted(SessionStart),
    SessionEnded(SessionEnd),
    Turn(Turn),
    Heartbeat {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl QueueItem {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted(start) => &start.session_id,
            Self::SessionEnded(end) => &end.session_id,
            Self::Turn(turn) => &turn.session_id,
            Self::Heartbeat { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted(_) => "session_started",
            Self::SessionEnded(_) => "session_ended",
            Self::Turn(_) => "turn",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Why an item was not accepted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Durability queue full, item dropped")]
    Full,

    #[error("Durability queue closed")]
    Closed,
}

/// Destination for items that could not be persisted
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, item: QueueItem, error: &PersistenceError);
}

/// Default sink: log and forget
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeadLetter;

impl DeadLetterSink for LoggingDeadLetter {
    fn dead_letter(&self, item: QueueItem, error: &PersistenceError) {
        tracing::error!(
            session_id = %item.session_id(),
            kind = item.kind(),
            error = %error,
            "Dropping item after exhausting retries"
        );
    }
}

#[derive(Default)]
struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
    pub pending: u64,
}

/// Bounded FIFO with a single persisting worker
pub struct DurabilityQueue {
    tx: Mutex<Option<mpsc::Sender<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<QueueStats>,
    capacity: usize,
}

impl DurabilityQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn start(
        config: &DurabilityConfig,
        store: Arc<dyn ConversationStore>,
        dead_letter: Arc<dyn DeadLetterSink>,
    ) -> Arc<Self> {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(QueueStats::default());

        let worker = Worker {
            rx,
            store,
            dead_letter,
            policy: RetryPolicy::from(config),
            stats: stats.clone(),
        };
        let handle = tokio::spawn(worker.run());

        tracing::info!(
            capacity,
            max_attempts = config.max_attempts,
            backoff_base_ms = config.backoff_base_ms,
            "Durability queue started"
        );

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            stats,
            capacity,
        })
    }

    /// Hand an item to the worker without waiting.
    ///
    /// A full queue drops the item; the caller carries on either way.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), EnqueueError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };

        match tx.try_send(item) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voice_gateway_durability_enqueued_total").increment(1);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voice_gateway_durability_dropped_total").increment(1);
                tracing::warn!(
                    session_id = %item.session_id(),
                    kind = item.kind(),
                    capacity = self.capacity,
                    "Durability queue full, dropping item"
                );
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Stop accepting items, flush what is buffered and join the worker
    pub async fn drain_and_stop(&self) {
        // Dropping the only sender lets the worker run dry and exit
        let sender = self.tx.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            tracing::info!(pending = self.stats().pending, "Draining durability queue");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Durability worker panicked");
            }
        }

        let stats = self.stats();
        tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            dropped = stats.dropped,
            "Durability queue stopped"
        );
    }

    pub fn is_accepting(&self) -> bool {
        self.tx.lock().is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        let enqueued = self.stats.enqueued.load(Ordering::Relaxed);
        let persisted = self.stats.persisted.load(Ordering::Relaxed);
        let failed = self.stats.failed.load(Ordering::Relaxed);
        QueueStatsSnapshot {
            enqueued,
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            persisted,
            failed,
            pending: enqueued.saturating_sub(persisted + failed),
        }
    }
}

struct Worker {
    rx: mpsc::Receiver<QueueItem>,
    store: Arc<dyn ConversationStore>,
    dead_letter: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    stats: Arc<QueueStats>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(item) = self.rx.recv().await {
            self.process(item).await;
        }
        tracing::debug!("Durability worker exiting");
    }

    async fn process(&self, item: QueueItem) {
        let store = self.store.as_ref();
        let pending = &item;

        match self.policy.run(item.kind(), || persist(store, pending)).await {
            Ok(()) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voice_gateway_durability_persisted_total").increment(1);
                tracing::trace!(session_id = %item.session_id(), kind = item.kind(), "Persisted");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voice_gateway_durability_failed_total").increment(1);
                self.dead_letter.dead_letter(item, &e);
            }
        }
    }
}

async fn persist(store: &dyn ConversationStore, item: &QueueItem) -> Result<(), PersistenceError> {
    match item {
        QueueItem::SessionStarted(start) => store.start_session(start).await,
        QueueItem::SessionEnded(end) => store.end_session(end).await,
        QueueItem::Turn(turn) => store.insert_turn(turn).await,
        QueueItem::Heartbeat { session_id, at } => store.record_heartbeat(session_id, *at).await,
    }
}
