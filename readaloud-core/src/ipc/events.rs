//! Event types emitted to the UI layer.
//!
//! ## Channels
//!
//! | Event | Source |
//! |-------|--------|
//! | `PlaybackStatusEvent` | every transport transition |
//! | `ProgressEvent` | `PlaybackEngine::tick()` while playing |
//! | `PlaybackSnapshot` | `PlaybackEngine::snapshot()` on demand |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transport status
// ---------------------------------------------------------------------------

/// Current state of the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// No buffer loaded.
    Idle,
    /// Buffer loaded, positioned at 0, nothing rendering.
    Stopped,
    /// A render node is live.
    Playing,
    /// Nothing rendering, position retained.
    Paused,
}

impl PlaybackStatus {
    pub fn is_playing(self) -> bool {
        self == PlaybackStatus::Playing
    }
}

/// Why a transition happened. Lets observers tell a natural end from a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionCause {
    Loaded,
    Started,
    Paused,
    /// Reached the end of the buffer on its own.
    Completed,
    Reset,
    Unloaded,
    Seeked,
    SpeedChanged,
}

/// Emitted on every transport transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatusEvent {
    pub status: PlaybackStatus,
    pub cause: TransitionCause,
    /// Logical offset after the transition (seconds).
    pub offset_secs: f64,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Emitted by each tick while playing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Position as a fraction of the buffer, in [0.0, 1.0].
    pub progress: f64,
    pub position_secs: f64,
}

/// Observable state for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub is_playing: bool,
    /// In [0.0, 1.0].
    pub progress: f64,
    pub speed: f64,
    pub position_secs: f64,
    pub duration_secs: f64,
}

impl PlaybackSnapshot {
    /// Snapshot of an engine with nothing loaded.
    pub fn idle(speed: f64) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            is_playing: false,
            progress: 0.0,
            speed,
            position_secs: 0.0,
            duration_secs: 0.0,
        }
    }
}
