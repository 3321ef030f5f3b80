//! Session and turn persistence

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use voice_gateway_core::Turn;

use crate::{PersistenceError, ScyllaClient};

/// "Session started" boundary record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// "Session ended" boundary record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub session_id: String,
    pub ended_at: DateTime<Utc>,
    /// Measured from the recorded start, not from whoever ended it
    pub duration: Duration,
    pub turn_count: u32,
    pub interruption_count: u32,
    pub reason: String,
}

/// Session row as seen by the reaper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_heartbeat_at: DateTime<Utc>,
    pub turn_count: u32,
    pub interruption_count: u32,
}

impl SessionRecord {
    pub fn from_start(start: &SessionStart) -> Self {
        Self {
            session_id: start.session_id.clone(),
            user_id: start.user_id.clone(),
            started_at: start.started_at,
            ended_at: None,
            is_active: true,
            last_heartbeat_at: start.started_at,
            turn_count: 0,
            interruption_count: 0,
        }
    }
}

/// Durable conversation store
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn start_session(&self, start: &SessionStart) -> Result<(), PersistenceError>;

    async fn end_session(&self, end: &SessionEnd) -> Result<(), PersistenceError>;

    /// Upsert keyed on `(session_id, sequence)`
    async fn insert_turn(&self, turn: &Turn) -> Result<(), PersistenceError>;

    async fn record_heartbeat(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    /// All sessions still marked active
    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>, PersistenceError>;
}

/// ScyllaDB implementation of the conversation store
#[derive(Clone)]
pub struct ScyllaConversationStore {
    client: ScyllaClient,
}

impl ScyllaConversationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[async_trait]
impl ConversationStore for ScyllaConversationStore {
    async fn start_session(&self, start: &SessionStart) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.sessions (
                session_id, user_id, started_at, is_active,
                last_heartbeat_at, turn_count, interruption_count, metadata_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let metadata_json = serde_json::to_string(&start.metadata)?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &start.session_id,
                    &start.user_id,
                    start.started_at.timestamp_millis(),
                    true,
                    start.started_at.timestamp_millis(),
                    0i32,
                    0i32,
                    metadata_json,
                ),
            )
            .await?;

        tracing::debug!(session_id = %start.session_id, "Session start persisted");
        Ok(())
    }

    async fn end_session(&self, end: &SessionEnd) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.sessions SET
                ended_at = ?,
                is_active = ?,
                duration_ms = ?,
                turn_count = ?,
                interruption_count = ?,
                end_reason = ?
             WHERE session_id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    end.ended_at.timestamp_millis(),
                    false,
                    end.duration.as_millis() as i64,
                    end.turn_count as i32,
                    end.interruption_count as i32,
                    &end.reason,
                    &end.session_id,
                ),
            )
            .await?;

        tracing::debug!(session_id = %end.session_id, "Session end persisted");
        Ok(())
    }

    async fn insert_turn(&self, turn: &Turn) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.turns (
                session_id, sequence, role, content, audio_ref,
                processing_time_ms, error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &turn.session_id,
                    turn.sequence as i64,
                    turn.role.as_str(),
                    &turn.content,
                    &turn.audio_ref,
                    turn.processing_time_ms as i64,
                    &turn.error,
                    turn.created_at.timestamp_millis(),
                ),
            )
            .await?;

        Ok(())
    }

    async fn record_heartbeat(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.sessions SET last_heartbeat_at = ? WHERE session_id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(query, (at.timestamp_millis(), session_id))
            .await?;

        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>, PersistenceError> {
        let query = format!(
            "SELECT session_id, user_id, started_at, ended_at, is_active,
                    last_heartbeat_at, turn_count, interruption_count
             FROM {}.sessions WHERE is_active = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (true,))
            .await?;

        let mut sessions = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (
                    session_id,
                    user_id,
                    started_at,
                    ended_at,
                    is_active,
                    last_heartbeat_at,
                    turn_count,
                    interruption_count,
                ): (
                    String,
                    Option<String>,
                    i64,
                    Option<i64>,
                    Option<bool>,
                    Option<i64>,
                    Option<i32>,
                    Option<i32>,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                sessions.push(SessionRecord {
                    session_id,
                    user_id: user_id.unwrap_or_default(),
                    started_at: from_millis(started_at),
                    ended_at: ended_at.map(from_millis),
                    is_active: is_active.unwrap_or(false),
                    last_heartbeat_at: from_millis(last_heartbeat_at.unwrap_or(started_at)),
                    turn_count: turn_count.unwrap_or(0).max(0) as u32,
                    interruption_count: interruption_count.unwrap_or(0).max(0) as u32,
                });
            }
        }

        Ok(sessions)
    }
}
