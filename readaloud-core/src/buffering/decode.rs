//! Raw PCM payload decoding.
//!
//! The speech synthesis call returns base64-encoded little-endian signed
//! 16-bit mono samples. Decoding is a pure transform: same input, same
//! buffer.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::AudioSampleBuffer;
use crate::error::{PlaybackError, Result};

/// Full-scale divisor for signed 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// Convert little-endian i16 PCM bytes into normalized f32 samples.
///
/// A trailing odd byte (half a sample) is ignored.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect()
}

/// Decode raw little-endian i16 mono PCM into a buffer at `sample_rate`.
///
/// # Errors
/// `PlaybackError::InvalidBuffer` when the payload holds no complete sample.
pub fn decode_pcm16_le(bytes: &[u8], sample_rate: u32) -> Result<AudioSampleBuffer> {
    if bytes.len() % 2 != 0 {
        tracing::debug!(len = bytes.len(), "odd PCM payload length, dropping last byte");
    }
    AudioSampleBuffer::mono(pcm16_le_to_f32(bytes), sample_rate)
}

/// Decode a base64 PCM payload (as returned by the TTS call).
///
/// Surrounding whitespace is trimmed before decoding.
///
/// # Errors
/// `PlaybackError::Decode` for malformed base64, `PlaybackError::InvalidBuffer`
/// for an empty payload.
pub fn decode_pcm16_base64(encoded: &str, sample_rate: u32) -> Result<AudioSampleBuffer> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    decode_pcm16_le(&bytes, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::TTS_SAMPLE_RATE;

    #[test]
    fn converts_full_scale_values() {
        let bytes = [
            0x00, 0x80, // i16::MIN
            0xff, 0x7f, // i16::MAX
            0x00, 0x00, // 0
            0x00, 0x40, // 16384
        ];
        let samples = pcm16_le_to_f32(&bytes);
        assert_eq!(samples[0], -1.0);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-7);
        assert_eq!(samples[2], 0.0);
        assert_eq!(samples[3], 0.5);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let samples = pcm16_le_to_f32(&[0x00, 0x40, 0x12]);
        assert_eq!(samples, vec![0.5]);
    }

    #[test]
    fn base64_payload_decodes_to_buffer() {
        // [0x00, 0x40, 0x00, 0xc0] → [0.5, -0.5]
        let buf = decode_pcm16_base64("AEAAwA==\n", TTS_SAMPLE_RATE).unwrap();
        assert_eq!(buf.samples(), &[0.5, -0.5]);
        assert_eq!(buf.sample_rate(), TTS_SAMPLE_RATE);
        assert_eq!(buf.channels(), 1);
    }

    #[test]
    fn decoding_is_deterministic() {
        let a = decode_pcm16_base64("AEAAwAAA", TTS_SAMPLE_RATE).unwrap();
        let b = decode_pcm16_base64("AEAAwAAA", TTS_SAMPLE_RATE).unwrap();
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = decode_pcm16_base64("not*base64", TTS_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }

    #[test]
    fn empty_payload_is_invalid_buffer() {
        let err = decode_pcm16_base64("", TTS_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidBuffer(_)));
    }
}
