//! WAV import / export for cached speech audio.

use std::io::{Read, Seek, Write};
use std::path::Path;

use super::{decode::PCM16_SCALE, AudioSampleBuffer};
use crate::error::Result;

/// Read a WAV file into a mono buffer, averaging channels when needed.
pub fn read_wav(path: &Path) -> Result<AudioSampleBuffer> {
    let reader = hound::WavReader::open(path)?;
    decode_wav(reader)
}

/// Read WAV data from any byte source.
pub fn read_wav_from<R: Read>(source: R) -> Result<AudioSampleBuffer> {
    let reader = hound::WavReader::new(source)?;
    decode_wav(reader)
}

fn decode_wav<R: Read>(mut reader: hound::WavReader<R>) -> Result<AudioSampleBuffer> {
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            // Full scale is 2^(bits-1) at every depth. hound hands back 8-bit data already signed.
            let full_scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    tracing::debug!(
        sample_rate = spec.sample_rate,
        channels,
        samples = interleaved.len(),
        "decoded WAV"
    );

    if channels == 1 {
        return AudioSampleBuffer::mono(interleaved, spec.sample_rate);
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().copied().sum::<f32>() / channels as f32)
        .collect();
    AudioSampleBuffer::mono(mono, spec.sample_rate)
}

/// Write a buffer as 16-bit mono WAV at its own sample rate.
pub fn write_wav(path: &Path, buffer: &AudioSampleBuffer) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_wav_to(file, buffer)
}

/// Write a buffer as 16-bit mono WAV into any seekable sink.
pub fn write_wav_to<W: Write + Seek>(sink: W, buffer: &AudioSampleBuffer) -> Result<()> {
    let spec = hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(sink, spec)?;
    for &sample in buffer.samples() {
        let scaled = (sample * PCM16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32);
        writer.write_sample(scaled as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
