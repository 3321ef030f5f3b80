//! Session lifecycle configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session lifecycle and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time an ended session stays in the registry to absorb late writes
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Reaper sweep interval
    #[serde(default = "default_check_interval")]
    pub heartbeat_check_interval_secs: u64,

    /// Silence after which a session is considered abandoned
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Minimum spacing between persisted heartbeat records per session
    #[serde(default = "default_persist_interval")]
    pub heartbeat_persist_interval_secs: u64,

    /// Per-session inbound message buffer
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

fn default_grace_period() -> u64 {
    60
}
fn default_check_interval() -> u64 {
    60
}
fn default_heartbeat_timeout() -> u64 {
    100
}
fn default_persist_interval() -> u64 {
    15
}
fn default_inbound_buffer() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            heartbeat_check_interval_secs: default_check_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            heartbeat_persist_interval_secs: default_persist_interval(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn heartbeat_persist_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_persist_interval_secs)
    }
}
