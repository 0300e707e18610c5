//! Time-domain arithmetic for a buffer of known duration.
//!
//! ## Model
//!
//! ```text
//! device clock ──────────────●──────────────●──────────►
//!                       clock_at_start      now
//!                            │◄─ (now - start) ─►│ × speed = elapsed
//! ```
//!
//! `clock_at_start` is the fictitious device instant at which playback would
//! have begun had it started from position 0 at the current speed. Elapsed
//! position at any later instant is then one subtraction and one multiply,
//! however many times the offset or speed has changed.
//!
//! Nothing in here touches a device; every function is deterministic.

use crate::error::{PlaybackError, Result};

/// Default tolerance for end-of-buffer detection (seconds).
pub const DEFAULT_COMPLETION_EPSILON_SECS: f64 = 0.1;

/// Reject non-positive or non-finite speed multipliers.
pub fn validate_speed(speed: f64) -> Result<f64> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(PlaybackError::InvalidSpeed(speed))
    }
}

/// Position math for one loaded buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTimeline {
    duration_secs: f64,
    epsilon_secs: f64,
}

impl AudioTimeline {
    /// Timeline for a buffer of `duration_secs`, with the default epsilon.
    ///
    /// # Errors
    /// `PlaybackError::InvalidBuffer` when the duration is zero, negative or
    /// non-finite.
    pub fn new(duration_secs: f64) -> Result<Self> {
        Self::with_epsilon(duration_secs, DEFAULT_COMPLETION_EPSILON_SECS)
    }

    pub fn with_epsilon(duration_secs: f64, epsilon_secs: f64) -> Result<Self> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(PlaybackError::InvalidBuffer(format!(
                "duration must be positive, got {duration_secs}"
            )));
        }
        Ok(Self {
            duration_secs,
            epsilon_secs: epsilon_secs.max(0.0),
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn epsilon_secs(&self) -> f64 {
        self.epsilon_secs
    }

    /// `device_now - offset / speed`.
    pub fn start_clock(&self, device_now: f64, offset_secs: f64, speed: f64) -> Result<f64> {
        let speed = validate_speed(speed)?;
        Ok(device_now - offset_secs / speed)
    }

    /// `(device_now - clock_at_start) * speed`.
    pub fn elapsed(&self, device_now: f64, clock_at_start: f64, speed: f64) -> Result<f64> {
        let speed = validate_speed(speed)?;
        Ok((device_now - clock_at_start) * speed)
    }

    /// `true` once `elapsed` is within epsilon of the end (scheduler jitter).
    pub fn has_completed(&self, elapsed_secs: f64) -> bool {
        elapsed_secs >= self.duration_secs - self.epsilon_secs
    }

    /// Fold an offset back into `[0, duration)`.
    pub fn wrap_offset(&self, offset_secs: f64) -> f64 {
        let wrapped = offset_secs.rem_euclid(self.duration_secs);
        // rem_euclid can round up to exactly `duration` for tiny negatives.
        if wrapped >= self.duration_secs {
            0.0
        } else {
            wrapped
        }
    }

    /// `elapsed / duration` clamped to [0, 1].
    pub fn progress(&self, elapsed_secs: f64) -> f64 {
        (elapsed_secs / self.duration_secs).clamp(0.0, 1.0)
    }

    /// `elapsed` clamped to the buffer.
    pub fn clamp_position(&self, elapsed_secs: f64) -> f64 {
        elapsed_secs.clamp(0.0, self.duration_secs)
    }
}
