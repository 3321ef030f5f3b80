//! Turn pipeline configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Turn pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Buffered audio size that triggers recognition without an `is_final` marker
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold_bytes: usize,

    /// Hard cap on buffered audio per turn; older audio beyond this is rejected
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,

    /// Maximum characters handed to synthesis in one segment
    #[serde(default = "default_segment_max_chars")]
    pub segment_max_chars: usize,

    /// Minimum characters before a sentence boundary closes a segment
    #[serde(default = "default_segment_min_chars")]
    pub segment_min_chars: usize,

    /// Use the agent's incremental stream instead of a single-shot reply
    #[serde(default = "default_true")]
    pub streaming_generation: bool,

    #[serde(default = "default_recognition_timeout")]
    pub recognition_timeout_ms: u64,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_ms: u64,

    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_ms: u64,

    /// Energy floor in dB below which uncompressed audio counts as silence
    #[serde(default = "default_energy_floor")]
    pub silence_energy_floor_db: f32,
}

fn default_buffer_threshold() -> usize {
    32_000 // 1s of 16kHz 16-bit mono
}
fn default_max_buffer() -> usize {
    960_000 // 30s
}
fn default_segment_max_chars() -> usize {
    200
}
fn default_segment_min_chars() -> usize {
    10
}
fn default_recognition_timeout() -> u64 {
    10_000
}
fn default_generation_timeout() -> u64 {
    30_000
}
fn default_synthesis_timeout() -> u64 {
    10_000
}
fn default_energy_floor() -> f32 {
    -50.0
}
fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_threshold_bytes: default_buffer_threshold(),
            max_buffer_bytes: default_max_buffer(),
            segment_max_chars: default_segment_max_chars(),
            segment_min_chars: default_segment_min_chars(),
            streaming_generation: true,
            recognition_timeout_ms: default_recognition_timeout(),
            generation_timeout_ms: default_generation_timeout(),
            synthesis_timeout_ms: default_synthesis_timeout(),
            silence_energy_floor_db: default_energy_floor(),
        }
    }
}

impl PipelineConfig {
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}
