//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Speech arrives at 24 kHz; output devices commonly run at 44.1 or 48 kHz.
//! The cpal backend converts each loaded buffer once, off the audio thread,
//! and renders the converted copy. Speed changes are applied at render time
//! and never go through rubato.
//!
//! When source rate == device rate, `RateConverter` is a passthrough and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{PlaybackError, Result};

/// Input frames per rubato call for whole-buffer conversion.
const RESAMPLE_CHUNK: usize = 1_024;

/// Upper bound on drain calls when flushing the resampler delay.
const MAX_DRAIN_CALLS: usize = 8;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == device rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer, holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `PlaybackError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == device_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = device_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| PlaybackError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(source_rate, device_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples accumulate until a full `chunk_size` block is available.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out whatever is buffered (pending input first, then the
    /// resampler's internal delay line).
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };

        let pending = [std::mem::take(&mut self.input_buf)];
        let wave_in: Option<&[Vec<f32>]> = if pending[0].is_empty() {
            None
        } else {
            Some(&pending[..])
        };
        let outcome = resampler.process_partial_into_buffer(wave_in, &mut self.output_buf, None);

        match outcome {
            Ok((_consumed, produced)) => self.output_buf[0][..produced].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    /// Output frames of latency introduced by the resampler.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Returns `true` when source rate == device rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole mono buffer, compensating for the resampler delay so the
/// output duration matches the input duration.
pub fn resample_buffer(samples: &[f32], source_rate: u32, device_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, device_rate, RESAMPLE_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let expected =
        (samples.len() as f64 * device_rate as f64 / source_rate as f64).round() as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(samples);
    out.extend(rc.flush());
    let mut drains = 0;
    while out.len() < expected + delay && drains < MAX_DRAIN_CALLS {
        out.extend(rc.flush());
        drains += 1;
    }

    let mut converted = out.split_off(delay.min(out.len()));
    converted.truncate(expected);
    Ok(converted)
}
