//! Inbound audio accumulation

use voice_gateway_core::{AudioEncoding, AudioFormat};

use crate::PipelineError;

/// Accumulates chunks of one utterance until it is ready for recognition
#[derive(Debug)]
pub struct AudioBuffer {
    data: Vec<u8>,
    format: Option<AudioFormat>,
    threshold: usize,
    max_bytes: usize,
}

impl AudioBuffer {
    pub fn new(threshold: usize, max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            format: None,
            threshold,
            max_bytes,
        }
    }

    /// Append a chunk. The first chunk of an utterance fixes its format.
    ///
    /// Returns the number of bytes now buffered.
    pub fn push(&mut self, chunk: &[u8], format: &str) -> Result<usize, PipelineError> {
        let encoding = AudioEncoding::parse(format)
            .ok_or_else(|| PipelineError::UnsupportedFormat(format.to_string()))?;

        match self.format {
            None => self.format = Some(AudioFormat::new(encoding)),
            Some(current) if current.encoding != encoding => {
                tracing::debug!(
                    expected = current.encoding.as_str(),
                    got = encoding.as_str(),
                    "Format changed mid-utterance, keeping the first"
                );
            }
            Some(_) => {}
        }

        if self.data.len() + chunk.len() > self.max_bytes {
            let limit = self.max_bytes;
            self.clear();
            return Err(PipelineError::BufferOverflow { limit });
        }

        self.data.extend_from_slice(chunk);
        Ok(self.data.len())
    }

    /// Whether recognition should run now
    pub fn is_ready(&self, is_final: bool) -> bool {
        !self.data.is_empty() && (is_final || self.data.len() >= self.threshold)
    }

    /// Take the buffered utterance, leaving the buffer empty
    pub fn take(&mut self) -> Option<(Vec<u8>, AudioFormat)> {
        if self.data.is_empty() {
            self.format = None;
            return None;
        }
        let format = self.format.take().unwrap_or_default();
        Some((std::mem::take(&mut self.data), format))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_and_final() {
        let mut buffer = AudioBuffer::new(4, 100);
        buffer.push(&[1, 2], "pcm16").unwrap();
        assert!(!buffer.is_ready(false));
        assert!(buffer.is_ready(true));

        buffer.push(&[3, 4], "pcm16").unwrap();
        assert!(buffer.is_ready(false));

        let (audio, format) = buffer.take().unwrap();
        assert_eq!(audio, vec![1, 2, 3, 4]);
        assert_eq!(format.encoding, AudioEncoding::Pcm16);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_final_is_not_ready() {
        let buffer = AudioBuffer::new(4, 100);
        assert!(!buffer.is_ready(true));
    }

    #[test]
    fn test_overflow_resets() {
        let mut buffer = AudioBuffer::new(4, 5);
        buffer.push(&[0; 4], "wav").unwrap();
        assert!(matches!(
            buffer.push(&[0; 4], "wav"),
            Err(PipelineError::BufferOverflow { limit: 5 })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut buffer = AudioBuffer::new(4, 100);
        assert!(matches!(
            buffer.push(&[0; 2], "flac"),
            Err(PipelineError::UnsupportedFormat(f)) if f == "flac"
        ));
        assert!(buffer.is_empty());
    }
}
