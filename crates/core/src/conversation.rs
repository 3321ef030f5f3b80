//! Conversation turn records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One immutable conversation record.
///
/// `(session_id, sequence)` is the storage key, so re-delivering the same
/// turn overwrites rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    /// Per-session ordinal assigned by the pipeline
    pub sequence: u64,
    pub role: TurnRole,
    pub content: String,
    /// Reference to stored audio, if any
    pub audio_ref: Option<String>,
    /// Wall time spent producing this turn
    pub processing_time_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        sequence: u64,
        role: TurnRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sequence,
            role,
            content: content.into(),
            audio_ref: None,
            processing_time_ms: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_audio_ref(mut self, audio_ref: impl Into<String>) -> Self {
        self.audio_ref = Some(audio_ref.into());
        self
    }

    /// Deterministic idempotency key
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.session_id, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_builder() {
        let turn = Turn::new("s-1", 3, TurnRole::Agent, "hello")
            .with_processing_time(120)
            .with_error("interrupted");

        assert_eq!(turn.role, TurnRole::Agent);
        assert_eq!(turn.processing_time_ms, 120);
        assert_eq!(turn.error.as_deref(), Some("interrupted"));
        assert_eq!(turn.storage_key(), "s-1:3");
    }

    #[test]
    fn test_role_round_trip_names() {
        for role in [TurnRole::User, TurnRole::Agent, TurnRole::System] {
            assert_eq!(TurnRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(TurnRole::parse("bot"), None);
    }
}
