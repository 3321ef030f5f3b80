//! Audio format descriptors and PCM helpers

use serde::{Deserialize, Serialize};

/// Container/encoding of an audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw 16-bit little-endian PCM
    Pcm16,
    /// RIFF/WAVE container
    Wav,
    /// WebM (browser MediaRecorder)
    Webm,
    /// Ogg/Opus
    Opus,
    /// MPEG layer 3
    Mp3,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
        }
    }

    /// Parse a wire `format` value; unknown values yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" | "pcm16" | "pcm_s16le" | "raw" => Some(Self::Pcm16),
            "wav" | "wave" => Some(Self::Wav),
            "webm" => Some(Self::Webm),
            "opus" | "ogg" => Some(Self::Opus),
            "mp3" | "mpeg" => Some(Self::Mp3),
            _ => None,
        }
    }

    /// Whether samples can be inspected without a decoder
    pub fn is_uncompressed(&self) -> bool {
        matches!(self, Self::Pcm16 | Self::Wav)
    }
}

/// Audio format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono)
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Wav,
            sample_rate: 16000,
            channels: 1,
        }
    }
}

impl AudioFormat {
    pub fn new(encoding: AudioEncoding) -> Self {
        Self {
            encoding,
            ..Default::default()
        }
    }
}

/// Size of a canonical RIFF/WAVE header
const WAV_HEADER_LEN: usize = 44;

/// Borrow the PCM payload of an uncompressed buffer.
///
/// Returns `None` for compressed encodings.
pub fn pcm_payload<'a>(bytes: &'a [u8], format: &AudioFormat) -> Option<&'a [u8]> {
    match format.encoding {
        AudioEncoding::Pcm16 => Some(bytes),
        AudioEncoding::Wav => {
            if bytes.len() >= WAV_HEADER_LEN && &bytes[0..4] == b"RIFF" {
                Some(&bytes[WAV_HEADER_LEN..])
            } else {
                Some(bytes)
            }
        }
        _ => None,
    }
}

/// RMS energy of 16-bit PCM in dBFS. Empty input is reported as `f32::NEG_INFINITY`.
pub fn pcm16_energy_db(pcm: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;

    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
        sum += sample * sample;
        count += 1;
    }

    if count == 0 {
        return f32::NEG_INFINITY;
    }

    let rms = (sum / count as f64).sqrt();
    if rms <= f64::EPSILON {
        f32::NEG_INFINITY
    } else {
        (20.0 * rms.log10()) as f32
    }
}
