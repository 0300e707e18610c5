//! # readaloud-core
//!
//! Playback engine for synthesized speech of translated documents.
//!
//! ## Architecture
//!
//! ```text
//! TTS PCM (base64) → decode → AudioSampleBuffer
//!                                   │
//!                         PlaybackEngine::load
//!                                   │
//!   transport command ──► PlaybackEngine ──► AudioTimeline (pure time math)
//!                                   │
//!                         OutputDevice::start_node ──► one-shot RenderNode
//!                                   │
//!            tick() ──► broadcast::Sender<ProgressEvent / PlaybackStatusEvent>
//! ```
//!
//! The device clock is injected through [`audio::OutputDevice`], so the whole
//! state machine runs against [`audio::stub::StubOutput`] in tests.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::{DeviceState, OutputDevice, RenderNode};
pub use buffering::AudioSampleBuffer;
pub use engine::{
    ticker::{spawn_progress_ticker, ProgressTicker},
    timeline::AudioTimeline,
    EngineConfig, PlaybackEngine, PlaybackSession,
};
pub use error::PlaybackError;
pub use ipc::events::{
    PlaybackSnapshot, PlaybackStatus, PlaybackStatusEvent, ProgressEvent, TransitionCause,
};

#[cfg(feature = "audio-cpal")]
pub use audio::cpal_output::CpalOutput;
