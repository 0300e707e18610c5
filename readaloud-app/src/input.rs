//! Load synthesized speech from disk.
//!
//! | Extension | Format |
//! |-----------|--------|
//! | `.wav` | RIFF/WAVE, int or float, mixed down to mono |
//! | `.b64`, `.txt` | base64 of 16-bit little-endian PCM |
//! | anything else | raw 16-bit little-endian PCM |

use std::fs;
use std::path::Path;

use anyhow::Context;
use readaloud_core::buffering::{
    decode::{decode_pcm16_base64, decode_pcm16_le},
    wav::read_wav,
};
use readaloud_core::AudioSampleBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Wav,
    Base64Pcm16,
    RawPcm16,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("wav" | "wave") => Self::Wav,
            Some("b64" | "base64" | "txt") => Self::Base64Pcm16,
            _ => Self::RawPcm16,
        }
    }
}

/// Decode `path` into a playable buffer.
///
/// `sample_rate` applies to the PCM formats; WAV files carry their own.
pub fn load_input(path: &Path, sample_rate: u32) -> anyhow::Result<AudioSampleBuffer> {
    let buffer = match InputFormat::from_path(path) {
        InputFormat::Wav => {
            read_wav(path).with_context(|| format!("reading WAV {}", path.display()))?
        }
        InputFormat::Base64Pcm16 => {
            let encoded = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            decode_pcm16_base64(&encoded, sample_rate)
                .with_context(|| format!("decoding base64 PCM from {}", path.display()))?
        }
        InputFormat::RawPcm16 => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            decode_pcm16_le(&bytes, sample_rate)
                .with_context(|| format!("decoding PCM from {}", path.display()))?
        }
    };
    Ok(buffer)
}
