//! Immutable, fully decoded audio assets handed to the playback engine.
//!
//! Samples live in an `Arc<[f32]>`: cloning a buffer is a refcount bump, and
//! the output backend can hold the same allocation while the engine keeps
//! its own handle.

pub mod decode;
pub mod wav;

use std::sync::Arc;

use crate::error::{PlaybackError, Result};

/// Sample rate of the speech synthesis output (Hz).
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// Channel count of the speech synthesis output.
pub const TTS_CHANNELS: u16 = 1;

/// A decoded mono PCM asset at a known sample rate.
///
/// Never mutated after construction. A new translation replaces the buffer
/// wholesale.
#[derive(Debug, Clone)]
pub struct AudioSampleBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    samples: Arc<[f32]>,
    /// Sample rate in Hz (24000 for TTS output).
    sample_rate: u32,
    channels: u16,
}

impl AudioSampleBuffer {
    /// Build a buffer, validating the upstream contract.
    ///
    /// # Errors
    /// `PlaybackError::InvalidBuffer` when the buffer has zero frames, a zero
    /// sample rate, a channel count other than 1, or non-finite samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels != TTS_CHANNELS {
            return Err(PlaybackError::InvalidBuffer(format!(
                "expected {TTS_CHANNELS} channel, got {channels}"
            )));
        }
        if sample_rate == 0 {
            return Err(PlaybackError::InvalidBuffer("sample rate is zero".into()));
        }
        if samples.is_empty() {
            return Err(PlaybackError::InvalidBuffer("buffer has zero frames".into()));
        }
        if let Some(idx) = samples.iter().position(|s| !s.is_finite()) {
            return Err(PlaybackError::InvalidBuffer(format!(
                "non-finite sample at frame {idx}"
            )));
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
        })
    }

    /// Mono buffer at `sample_rate`.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples, sample_rate, TTS_CHANNELS)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample storage.
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (one sample per frame for mono).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Returns the duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// `true` when both handles point at the same decoded asset.
    pub fn same_asset(&self, other: &AudioSampleBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_frames_over_rate() {
        let buf = AudioSampleBuffer::mono(vec![0.0; 36_000], TTS_SAMPLE_RATE).unwrap();
        assert_eq!(buf.frames(), 36_000);
        assert!((buf.duration_secs() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_zero_frames() {
        let err = AudioSampleBuffer::mono(vec![], TTS_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidBuffer(_)));
    }

    #[test]
    fn rejects_stereo_and_zero_rate() {
        assert!(matches!(
            AudioSampleBuffer::new(vec![0.0; 4], TTS_SAMPLE_RATE, 2),
            Err(PlaybackError::InvalidBuffer(_))
        ));
        assert!(matches!(
            AudioSampleBuffer::mono(vec![0.0; 4], 0),
            Err(PlaybackError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn rejects_nan_samples() {
        let err = AudioSampleBuffer::mono(vec![0.0, f32::NAN, 0.1], TTS_SAMPLE_RATE).unwrap_err();
        assert!(err.to_string().contains("frame 1"), "got: {err}");
    }

    #[test]
    fn clones_share_the_same_asset() {
        let a = AudioSampleBuffer::mono(vec![0.25; 10], TTS_SAMPLE_RATE).unwrap();
        let b = a.clone();
        let c = AudioSampleBuffer::mono(vec![0.25; 10], TTS_SAMPLE_RATE).unwrap();
        assert!(a.same_asset(&b));
        assert!(!a.same_asset(&c));
    }
}
