//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, DurabilityConfig, PersistenceConfig, PipelineConfig, SessionConfig};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub durability: DurabilityConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_sessions == 0 {
            return Err(ConfigError::invalid("server.max_sessions", "must be at least 1"));
        }

        if self.durability.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "durability.queue_capacity",
                "must be at least 1",
            ));
        }

        if self.durability.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "durability.max_attempts",
                "must be at least 1",
            ));
        }

        if self.session.heartbeat_check_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "session.heartbeat_check_interval_secs",
                "must be at least 1",
            ));
        }

        if self.session.heartbeat_timeout_secs <= self.session.heartbeat_check_interval_secs {
            return Err(ConfigError::invalid(
                "session.heartbeat_timeout_secs",
                "must exceed heartbeat_check_interval_secs",
            ));
        }

        if self.session.heartbeat_timeout_secs <= self.session.heartbeat_persist_interval_secs {
            return Err(ConfigError::invalid(
                "session.heartbeat_timeout_secs",
                "must exceed heartbeat_persist_interval_secs or live sessions get reaped",
            ));
        }

        if self.pipeline.segment_min_chars > self.pipeline.segment_max_chars {
            return Err(ConfigError::invalid(
                "pipeline.segment_min_chars",
                "must not exceed segment_max_chars",
            ));
        }

        if self.pipeline.buffer_threshold_bytes > self.pipeline.max_buffer_bytes {
            tracing::warn!(
                threshold = self.pipeline.buffer_threshold_bytes,
                max = self.pipeline.max_buffer_bytes,
                "Buffer threshold above max buffer; only is_final will trigger recognition"
            );
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrently registered sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Attempts for handshake messages that must reach the client
    #[serde(default = "default_critical_send_attempts")]
    pub critical_send_attempts: u32,

    /// CORS allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    1000
}
fn default_critical_send_attempts() -> u32 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            critical_send_attempts: default_critical_send_attempts(),
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and expose `/metrics`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOICE_GATEWAY__` prefix, `__` separator)
/// 2. config/{env}.{yaml,toml} (if env specified)
/// 3. config/default.{yaml,toml}
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_GATEWAY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
