//! Session Management
//!
//! [`SessionRegistry`] is the single owner of live connections and the only
//! authority on whether a session is alive. Ending a session is a
//! check-and-set, so explicit disconnects, failed writes, the HTTP API and
//! the heartbeat reaper can all race to end the same session and exactly one
//! "session ended" record is produced.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use voice_gateway_config::{ServerConfig, SessionConfig};
use voice_gateway_persistence::{DurabilityQueue, QueueItem, SessionEnd, SessionRecord, SessionStart};
use voice_gateway_pipeline::{InterruptFlag, TurnCounters};
use voice_gateway_transport::{Connection, OutboundEnvelope, OutboundMessage};

use crate::ServerError;

/// Delay between attempts of a critical send
const CRITICAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Live session state
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    ended: AtomicBool,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    end_reason: RwLock<Option<String>>,
    last_heartbeat_at: RwLock<DateTime<Utc>>,
    last_heartbeat_persisted: Mutex<Option<Instant>>,
    interrupt: InterruptFlag,
    counters: Arc<TurnCounters>,
}

impl Session {
    fn new(id: String, user_id: String, connection: Arc<dyn Connection>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            started_at: now,
            connection: RwLock::new(Some(connection)),
            ended: AtomicBool::new(false),
            ended_at: RwLock::new(None),
            end_reason: RwLock::new(None),
            last_heartbeat_at: RwLock::new(now),
            last_heartbeat_persisted: Mutex::new(None),
            interrupt: InterruptFlag::new(),
            counters: Arc::new(TurnCounters::default()),
        }
    }

    /// `false` once ended; never flips back
    pub fn is_active(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read()
    }

    pub fn end_reason(&self) -> Option<String> {
        self.end_reason.read().clone()
    }

    pub fn last_heartbeat_at(&self) -> DateTime<Utc> {
        *self.last_heartbeat_at.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .is_some_and(|conn| conn.is_connected())
    }

    /// Flag the turn pipeline polls before each outbound chunk
    pub fn interrupt(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Counters the turn pipeline writes
    pub fn counters(&self) -> Arc<TurnCounters> {
        self.counters.clone()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at(),
            is_active: self.is_active(),
            is_connected: self.is_connected(),
            turn_count: self.counters.turns(),
            interruption_count: self.counters.interruptions(),
            last_heartbeat_at: self.last_heartbeat_at(),
            end_reason: self.end_reason(),
        }
    }

    fn touch(&self, at: DateTime<Utc>) {
        let mut last = self.last_heartbeat_at.write();
        if at > *last {
            *last = at;
        }
    }

    /// Check-and-set the end of life; only the first caller gets `true`
    fn try_end(&self, at: DateTime<Utc>, reason: &str) -> bool {
        if self
            .ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.ended_at.write() = Some(at);
        *self.end_reason.write() = Some(reason.to_string());
        true
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    fn release_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.write().take()
    }
}

/// Serializable session view for the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_connected: bool,
    pub turn_count: u32,
    pub interruption_count: u32,
    pub last_heartbeat_at: DateTime<Utc>,
    pub end_reason: Option<String>,
}

/// Owner of every live session
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Store-only sessions already ended by this process
    ended_orphans: Mutex<HashSet<String>>,
    queue: Arc<DurabilityQueue>,
    config: SessionConfig,
    max_sessions: usize,
    critical_send_attempts: u32,
}

impl SessionRegistry {
    pub fn new(
        session: &SessionConfig,
        server: &ServerConfig,
        queue: Arc<DurabilityQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            ended_orphans: Mutex::new(HashSet::new()),
            queue,
            config: session.clone(),
            max_sessions: server.max_sessions,
            critical_send_attempts: server.critical_send_attempts.max(1),
        })
    }

    /// Register a new connection and record the session start
    pub fn connect(
        &self,
        connection: Arc<dyn Connection>,
        user_id: &str,
    ) -> Result<Arc<Session>, ServerError> {
        let session = {
            let mut sessions = self.sessions.write();
            let live = sessions.values().filter(|s| s.is_active()).count();
            if live >= self.max_sessions {
                tracing::warn!(max = self.max_sessions, "Rejecting connection, session capacity reached");
                return Err(ServerError::Capacity {
                    max: self.max_sessions,
                });
            }

            let id = uuid::Uuid::new_v4().to_string();
            let session = Arc::new(Session::new(id.clone(), user_id.to_string(), connection));
            sessions.insert(id, session.clone());
            session
        };

        self.enqueue(QueueItem::SessionStarted(SessionStart {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            metadata: serde_json::json!({}),
        }));

        crate::metrics::record_session_created();
        crate::metrics::record_active_sessions(self.active_count());
        tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session connected");

        Ok(session)
    }

    /// End a session. Idempotent: only the first call for a session does
    /// anything and returns `true`.
    pub async fn disconnect(self: &Arc<Self>, session_id: &str, reason: &str) -> bool {
        let Some(session) = self.lookup(session_id) else {
            tracing::debug!(session_id, reason, "Disconnect for unknown session");
            return false;
        };

        let now = Utc::now();
        if !session.try_end(now, reason) {
            tracing::debug!(session_id, reason, "Session already ended");
            return false;
        }

        // Stop any outbound stream at its next checkpoint
        session.interrupt.set();

        let duration = (now - session.started_at).to_std().unwrap_or_default();
        self.enqueue(QueueItem::SessionEnded(SessionEnd {
            session_id: session.id.clone(),
            ended_at: now,
            duration,
            turn_count: session.counters.turns(),
            interruption_count: session.counters.interruptions(),
            reason: reason.to_string(),
        }));

        if let Some(connection) = session.release_connection() {
            connection.close().await;
        }

        self.schedule_removal(session_id.to_string());

        metrics::counter!("voice_gateway_sessions_ended_total", "reason" => reason.to_string())
            .increment(1);
        crate::metrics::record_active_sessions(self.active_count());
        tracing::info!(
            session_id,
            reason,
            duration_secs = duration.as_secs(),
            turns = session.counters.turns(),
            "Session ended"
        );

        true
    }

    /// End a session known only to the durable store, e.g. left over from a
    /// previous process. Returns `false` if this process already ended it.
    pub async fn end_orphan(self: &Arc<Self>, record: &SessionRecord, reason: &str) -> bool {
        if self.lookup(&record.session_id).is_some() {
            return self.disconnect(&record.session_id, reason).await;
        }

        if !self.ended_orphans.lock().insert(record.session_id.clone()) {
            return false;
        }

        let now = Utc::now();
        let duration = (now - record.started_at).to_std().unwrap_or_default();
        self.enqueue(QueueItem::SessionEnded(SessionEnd {
            session_id: record.session_id.clone(),
            ended_at: now,
            duration,
            turn_count: record.turn_count,
            interruption_count: record.interruption_count,
            reason: reason.to_string(),
        }));

        let registry = Arc::downgrade(self);
        let session_id = record.session_id.clone();
        let grace = self.config.grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(registry) = registry.upgrade() {
                registry.ended_orphans.lock().remove(&session_id);
            }
        });

        metrics::counter!("voice_gateway_sessions_ended_total", "reason" => reason.to_string())
            .increment(1);
        tracing::info!(session_id = %record.session_id, reason, "Orphaned session ended");
        true
    }

    /// Best-effort write. A failed write ends the session.
    pub async fn send(self: &Arc<Self>, session_id: &str, message: OutboundMessage) {
        let Some(session) = self.lookup(session_id) else {
            tracing::debug!(session_id, event = message.event_name(), "Send to unknown session");
            return;
        };
        if !session.is_active() {
            return;
        }
        let Some(connection) = session.connection() else {
            return;
        };

        let event = message.event_name();
        if let Err(e) = connection
            .send(OutboundEnvelope::new(session_id, message))
            .await
        {
            tracing::warn!(
                session_id,
                event,
                error_type = "connection_error",
                error = %e,
                "Write failed, ending session"
            );
            self.disconnect(session_id, "connection_error").await;
        }
    }

    /// Write that must reach the client; retried a bounded number of times
    pub async fn send_critical(
        &self,
        session_id: &str,
        message: OutboundMessage,
    ) -> Result<(), ServerError> {
        let session = self
            .lookup(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.to_string()))?;

        let mut attempt = 1;
        loop {
            let connection = session
                .connection()
                .ok_or_else(|| ServerError::SessionNotFound(session_id.to_string()))?;

            match connection
                .send(OutboundEnvelope::new(session_id, message.clone()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.critical_send_attempts => {
                    tracing::error!(session_id, attempts = attempt, error = %e, "Critical send failed");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(session_id, attempt, error = %e, "Critical send failed, retrying");
                    tokio::time::sleep(CRITICAL_RETRY_DELAY).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Record client liveness now
    pub fn heartbeat(&self, session_id: &str) -> bool {
        self.heartbeat_at(session_id, Utc::now())
    }

    /// Record client liveness at `at`. Persists at most once per
    /// `heartbeat_persist_interval`.
    pub fn heartbeat_at(&self, session_id: &str, at: DateTime<Utc>) -> bool {
        let Some(session) = self.lookup(session_id) else {
            return false;
        };
        if !session.is_active() {
            return false;
        }

        session.touch(at);

        let due = {
            let mut persisted = session.last_heartbeat_persisted.lock();
            let now = Instant::now();
            let due = persisted
                .map_or(true, |last| now.duration_since(last) >= self.config.heartbeat_persist_interval());
            if due {
                *persisted = Some(now);
            }
            due
        };

        if due {
            self.enqueue(QueueItem::Heartbeat {
                session_id: session_id.to_string(),
                at,
            });
        }
        true
    }

    /// All registered sessions, including ended ones still in their grace window
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// End every live session; used on shutdown
    pub async fn disconnect_all(self: &Arc<Self>, reason: &str) -> usize {
        let ids: Vec<String> = self
            .list()
            .into_iter()
            .filter(|s| s.is_active())
            .map(|s| s.id.clone())
            .collect();

        let mut ended = 0;
        for id in ids {
            if self.disconnect(&id, reason).await {
                ended += 1;
            }
        }
        ended
    }

    fn enqueue(&self, item: QueueItem) {
        if let Err(e) = self.queue.enqueue(item) {
            tracing::debug!(error = %e, "Session record not queued");
        }
    }

    fn schedule_removal(self: &Arc<Self>, session_id: String) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let grace = self.config.grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(registry) = registry.upgrade() {
                if registry.sessions.write().remove(&session_id).is_some() {
                    tracing::debug!(session_id = %session_id, "Session removed after grace period");
                }
            }
        });
    }
}
