//! Output device abstraction.
//!
//! The engine never talks to an audio API directly. It sees:
//!
//! - an [`OutputDevice`]: a monotonic clock, a suspended/running state, an
//!   async resume, and a factory for render nodes;
//! - a [`RenderNode`]: a one-shot handle rendering one buffer from a fixed
//!   offset. It can be retuned or stopped, never repositioned.
//!
//! Backends:
//! - [`cpal_output::CpalOutput`] (feature `audio-cpal`): real hardware.
//! - [`stub::StubOutput`]: manually advanced clock for tests and headless
//!   hosts.

pub mod device;
pub mod resample;
pub mod stub;

#[cfg(feature = "audio-cpal")]
pub mod cpal_output;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::buffering::AudioSampleBuffer;
use crate::error::Result;

/// Lifecycle of an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Not rendering; the clock does not advance. Initial state on most
    /// platforms until something asks to play.
    Suspended,
    /// Rendering; the clock advances.
    Running,
    /// Released. Cannot be resumed.
    Closed,
}

/// Contract for audio output backends.
pub trait OutputDevice: Send + Sync + 'static {
    type Node: RenderNode;

    /// Monotonic device clock, in seconds.
    fn current_time(&self) -> f64;

    fn state(&self) -> DeviceState;

    /// Ask the device to leave the suspended state.
    ///
    /// # Errors
    /// `PlaybackError::DeviceUnavailable` if the device cannot be acquired or
    /// resumed.
    fn resume(&self) -> impl Future<Output = Result<()>> + Send;

    /// Start rendering `buffer` from `offset_secs` at `rate`.
    ///
    /// Any node previously started on this device has already been stopped
    /// by the caller.
    fn start_node(
        &self,
        buffer: &AudioSampleBuffer,
        offset_secs: f64,
        rate: f64,
    ) -> Result<Self::Node>;
}

/// A live, single-use render handle.
pub trait RenderNode: Send + 'static {
    /// Change the playback rate immediately (pitch shifts with it).
    fn set_rate(&self, rate: f64);

    /// Stop rendering. Stopping an already stopped or ended node is a no-op.
    fn stop(&mut self);

    /// `true` once the node has rendered the last frame of its buffer.
    fn has_ended(&self) -> bool;
}
