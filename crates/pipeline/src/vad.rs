//! Energy-based speech validation
//!
//! Rejects clearly silent utterances before a recognition call is spent on
//! them. Compressed audio cannot be inspected without a decoder and is
//! always passed through.

use async_trait::async_trait;
use voice_gateway_core::audio::{pcm16_energy_db, pcm_payload};
use voice_gateway_core::{AudioFormat, Result, SpeechValidator};

/// Minimum PCM payload (10ms at 16kHz) worth measuring
const MIN_PCM_BYTES: usize = 320;

/// RMS energy gate
#[derive(Debug, Clone, Copy)]
pub struct EnergyValidator {
    floor_db: f32,
}

impl EnergyValidator {
    pub fn new(floor_db: f32) -> Self {
        Self { floor_db }
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }
}

impl Default for EnergyValidator {
    fn default() -> Self {
        Self::new(-50.0)
    }
}

#[async_trait]
impl SpeechValidator for EnergyValidator {
    async fn contains_speech(&self, audio: &[u8], format: &AudioFormat) -> Result<bool> {
        if audio.is_empty() {
            return Ok(false);
        }

        let Some(pcm) = pcm_payload(audio, format) else {
            return Ok(true);
        };

        if pcm.len() < MIN_PCM_BYTES {
            return Ok(false);
        }

        let energy = pcm16_energy_db(pcm);
        tracing::trace!(energy_db = energy, floor_db = self.floor_db, "Utterance energy");
        Ok(energy >= self.floor_db)
    }
}
