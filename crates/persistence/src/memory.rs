//! Process-local conversation store
//!
//! Used when no cluster is configured and as the store in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use voice_gateway_core::Turn;

use crate::{ConversationStore, PersistenceError, SessionEnd, SessionRecord, SessionStart};

/// In-memory store with the same upsert semantics as the Scylla tables
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    turns: RwLock<BTreeMap<(String, u64), Turn>>,
    ends: RwLock<Vec<SessionEnd>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session row directly, bypassing the queue
    pub fn seed(&self, record: SessionRecord) {
        self.sessions
            .write()
            .insert(record.session_id.clone(), record);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Turns for a session in sequence order
    pub fn turns(&self, session_id: &str) -> Vec<Turn> {
        self.turns
            .read()
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, turn)| turn.clone())
            .collect()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.read().len()
    }

    /// Every end record received, duplicates included
    pub fn end_records(&self, session_id: &str) -> Vec<SessionEnd> {
        self.ends
            .read()
            .iter()
            .filter(|end| end.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn start_session(&self, start: &SessionStart) -> Result<(), PersistenceError> {
        self.sessions
            .write()
            .insert(start.session_id.clone(), SessionRecord::from_start(start));
        Ok(())
    }

    async fn end_session(&self, end: &SessionEnd) -> Result<(), PersistenceError> {
        self.ends.write().push(end.clone());

        let mut sessions = self.sessions.write();
        if let Some(record) = sessions.get_mut(&end.session_id) {
            record.is_active = false;
            record.ended_at = Some(end.ended_at);
            record.turn_count = end.turn_count;
            record.interruption_count = end.interruption_count;
        }
        Ok(())
    }

    async fn insert_turn(&self, turn: &Turn) -> Result<(), PersistenceError> {
        self.turns
            .write()
            .insert((turn.session_id.clone(), turn.sequence), turn.clone());
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            if at > record.last_heartbeat_at {
                record.last_heartbeat_at = at;
            }
        }
        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>, PersistenceError> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|record| record.is_active)
            .cloned()
            .collect())
    }
}
