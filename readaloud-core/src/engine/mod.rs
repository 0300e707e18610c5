//! `PlaybackEngine`: transport state machine over one output device.
//!
//! ## Lifecycle
//!
//! ```text
//! PlaybackEngine::new()                        status = Idle
//!     └─► load(buffer)                         status = Stopped, offset = 0
//!         └─► play().await   → node started    status = Playing
//!             ├─► pause()    → node stopped    status = Paused, offset kept
//!             ├─► tick()     → end detected    status = Stopped, offset = 0
//!             └─► reset()    → node stopped    status = Stopped, offset = 0
//!     unload() from anywhere                   status = Idle
//! ```
//!
//! Render nodes are one-shot: every play or seek builds a fresh node at an
//! explicit offset, and the previous node is always stopped first.
//!
//! ## Concurrency
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across
//! an `.await`. `play()` is the only suspending operation (it may wait for the
//! device to resume). Overlapping `play()` calls are serialized by an async
//! gate. Commands that supersede a pending start (`reset`, `load`, `unload`)
//! bump an epoch and publish it on a `watch` channel; the waiting `play()`
//! drops the resume future and returns `Cancelled`, releasing the gate. A
//! `pause()` during a pending start is deferred: the node starts once the
//! device is running and is paused straight away.

pub mod ticker;
pub mod timeline;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    audio::{DeviceState, OutputDevice, RenderNode},
    buffering::AudioSampleBuffer,
    error::{PlaybackError, Result},
    ipc::events::{
        PlaybackSnapshot, PlaybackStatus, PlaybackStatusEvent, ProgressEvent, TransitionCause,
    },
};

use self::timeline::{validate_speed, AudioTimeline, DEFAULT_COMPLETION_EPSILON_SECS};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Two speeds closer than this are the same menu entry.
const SPEED_MATCH_TOLERANCE: f64 = 1e-6;

/// Configuration for `PlaybackEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Speed multipliers `set_speed` accepts.
    /// Default: 0.5, 0.75, 1.0, 1.25, 1.5, 2.0.
    pub supported_speeds: Vec<f64>,
    /// Speed of a fresh engine. Default: 1.0.
    pub default_speed: f64,
    /// End-of-buffer tolerance for completion polling (seconds). Default: 0.1.
    pub completion_epsilon_secs: f64,
    /// Cadence of the progress ticker. Default: 16 ms (≈ display refresh).
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            supported_speeds: vec![0.5, 0.75, 1.0, 1.25, 1.5, 2.0],
            default_speed: 1.0,
            completion_epsilon_secs: DEFAULT_COMPLETION_EPSILON_SECS,
            progress_interval: Duration::from_millis(16),
        }
    }
}

impl EngineConfig {
    pub fn is_supported_speed(&self, speed: f64) -> bool {
        speed.is_finite()
            && self
                .supported_speeds
                .iter()
                .any(|s| (s - speed).abs() < SPEED_MATCH_TOLERANCE)
    }
}

/// Timing basis of the live node. Rebuilt every time a node starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSession {
    pub speed: f64,
    /// Position within the buffer at which the live node was started.
    pub logical_offset_secs: f64,
    /// Device instant at which playback would have begun from position 0.
    pub device_clock_at_start: f64,
}

struct LoadedAudio {
    buffer: AudioSampleBuffer,
    timeline: AudioTimeline,
}

struct EngineState<N> {
    loaded: Option<LoadedAudio>,
    status: PlaybackStatus,
    speed: f64,
    /// Where the next node starts. Always in `[0, duration)`.
    offset_secs: f64,
    /// `Some` exactly while a node is live.
    session: Option<PlaybackSession>,
    node: Option<N>,
    /// Bumped by commands that supersede a pending start.
    epoch: u64,
    /// A `play()` is waiting on the device.
    pending_start: bool,
    /// `pause()` arrived while `pending_start` was set.
    pause_requested: bool,
}

impl<N: RenderNode> EngineState<N> {
    /// Stop and drop the live node, if any.
    fn release_node(&mut self) {
        if let Some(mut node) = self.node.take() {
            node.stop();
        }
        self.session = None;
    }

    /// Elapsed position of the live node at `device_now`.
    fn elapsed_at(&self, device_now: f64) -> Option<(AudioTimeline, f64)> {
        let loaded = self.loaded.as_ref()?;
        let session = self.session?;
        let elapsed = loaded
            .timeline
            .elapsed(device_now, session.device_clock_at_start, session.speed)
            .ok()?;
        Some((loaded.timeline, elapsed))
    }

    fn supersede_pending(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.pending_start = false;
        self.pause_requested = false;
    }
}

/// The transport controller.
///
/// `PlaybackEngine` is `Send + Sync` when its device is. Wrap in
/// `Arc<PlaybackEngine<_>>` to share it with the progress ticker.
pub struct PlaybackEngine<D: OutputDevice> {
    config: EngineConfig,
    device: D,
    state: Mutex<EngineState<D::Node>>,
    /// Serializes `play()` calls across the device-resume await.
    play_gate: tokio::sync::Mutex<()>,
    /// Latest epoch, watched by a `play()` parked on the device.
    epoch_tx: watch::Sender<u64>,
    status_tx: broadcast::Sender<PlaybackStatusEvent>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    progress_seq: AtomicU64,
}

impl<D: OutputDevice> PlaybackEngine<D> {
    /// Create an idle engine that renders through `device`.
    pub fn new(config: EngineConfig, device: D) -> Self {
        let speed = if config.is_supported_speed(config.default_speed) {
            config.default_speed
        } else {
            warn!(
                default_speed = config.default_speed,
                "default speed not in supported set, using 1.0"
            );
            1.0
        };
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (progress_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            device,
            state: Mutex::new(EngineState {
                loaded: None,
                status: PlaybackStatus::Idle,
                speed,
                offset_secs: 0.0,
                session: None,
                node: None,
                epoch: 0,
                pending_start: false,
                pause_requested: false,
            }),
            play_gate: tokio::sync::Mutex::new(()),
            epoch_tx: watch::channel(0).0,
            status_tx,
            progress_tx,
            progress_seq: AtomicU64::new(0),
        }
    }

    /// Replace the current buffer. Any live node is stopped; the engine ends
    /// up Stopped at offset 0.
    ///
    /// # Errors
    /// `PlaybackError::InvalidBuffer` if the buffer has no duration.
    pub fn load(&self, buffer: AudioSampleBuffer) -> Result<()> {
        let timeline =
            AudioTimeline::with_epsilon(buffer.duration_secs(), self.config.completion_epsilon_secs)?;

        let mut s = self.state.lock();
        self.supersede_locked(&mut s);
        s.release_node();
        info!(
            duration_secs = timeline.duration_secs(),
            sample_rate = buffer.sample_rate(),
            frames = buffer.frames(),
            "buffer loaded"
        );
        s.loaded = Some(LoadedAudio { buffer, timeline });
        s.offset_secs = 0.0;
        self.transition(&mut s, PlaybackStatus::Stopped, TransitionCause::Loaded);
        Ok(())
    }

    /// Start rendering from the current offset.
    ///
    /// Resumes the device first if it is suspended. Returns once the node is
    /// live. A no-op while already playing.
    ///
    /// # Errors
    /// - `PlaybackError::NotLoaded` while Idle.
    /// - `PlaybackError::DeviceUnavailable` if the device cannot be resumed;
    ///   the engine stays Stopped/Paused.
    /// - `PlaybackError::Cancelled` if `reset`/`load`/`unload` ran while the
    ///   resume was in flight. The wait is abandoned at once.
    ///
    /// A `pause()` issued while the resume is in flight does not cancel: the
    /// node starts and is paused immediately, and `play()` returns `Ok`.
    pub async fn play(&self) -> Result<()> {
        let _serial = self.play_gate.lock().await;

        let (epoch, mut epoch_rx) = {
            let mut s = self.state.lock();
            match s.status {
                PlaybackStatus::Idle => return Err(PlaybackError::NotLoaded),
                PlaybackStatus::Playing => {
                    debug!("play() while playing, ignoring");
                    return Ok(());
                }
                PlaybackStatus::Stopped | PlaybackStatus::Paused => {}
            }
            if self.device.state() == DeviceState::Running {
                return self.start_node_locked(&mut s, TransitionCause::Started);
            }
            s.pending_start = true;
            s.pause_requested = false;
            (s.epoch, self.epoch_tx.subscribe())
        };

        info!(device_state = ?self.device.state(), "output device not running, requesting resume");
        let resumed = tokio::select! {
            r = self.device.resume() => r,
            _ = epoch_rx.changed() => {
                debug!("pending start superseded, abandoning device resume");
                return Err(PlaybackError::Cancelled);
            }
        };

        let mut s = self.state.lock();
        if s.epoch != epoch {
            debug!("device resume settled after a superseding command, discarding");
            return Err(PlaybackError::Cancelled);
        }
        s.pending_start = false;
        let pause_requested = std::mem::take(&mut s.pause_requested);

        if let Err(e) = resumed {
            warn!("device resume failed: {e}");
            return Err(match e {
                PlaybackError::DeviceUnavailable(_) => e,
                other => PlaybackError::DeviceUnavailable(other.to_string()),
            });
        }

        self.start_node_locked(&mut s, TransitionCause::Started)?;
        if pause_requested {
            debug!("applying pause requested during device resume");
            self.pause_locked(&mut s);
        }
        Ok(())
    }

    /// Stop the live node and keep its position. No-op unless playing,
    /// except that a `play()` still waiting on the device will pause right
    /// after its node starts.
    pub fn pause(&self) {
        let mut s = self.state.lock();

        if s.pending_start {
            s.pause_requested = true;
            debug!("pause() deferred until the pending start lands");
            return;
        }
        self.pause_locked(&mut s);
    }

    fn pause_locked(&self, s: &mut EngineState<D::Node>) {
        if s.status != PlaybackStatus::Playing {
            return;
        }

        let now = self.device.current_time();
        let Some((timeline, elapsed)) = s.elapsed_at(now) else {
            warn!("playing without a session, forcing stop");
            self.finish_locked(s, TransitionCause::Reset);
            return;
        };

        if s.node.as_ref().is_some_and(|n| n.has_ended()) || timeline.has_completed(elapsed) {
            self.finish_locked(s, TransitionCause::Completed);
            return;
        }

        s.release_node();
        s.offset_secs = timeline.wrap_offset(elapsed);
        info!(offset_secs = s.offset_secs, "playback paused");
        self.transition(s, PlaybackStatus::Paused, TransitionCause::Paused);
    }

    /// Invalidate any pending start and wake the `play()` waiting on it.
    fn supersede_locked(&self, s: &mut EngineState<D::Node>) {
        s.supersede_pending();
        self.epoch_tx.send_replace(s.epoch);
    }

    /// Stop and rewind to 0. No-op while Idle.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        if s.status == PlaybackStatus::Idle {
            return;
        }
        self.supersede_locked(&mut s);
        self.finish_locked(&mut s, TransitionCause::Reset);
        info!("playback reset");
    }

    /// Release the buffer and return to Idle.
    pub fn unload(&self) {
        let mut s = self.state.lock();
        if s.status == PlaybackStatus::Idle {
            return;
        }
        self.supersede_locked(&mut s);
        s.release_node();
        s.loaded = None;
        s.offset_secs = 0.0;
        self.transition(&mut s, PlaybackStatus::Idle, TransitionCause::Unloaded);
        info!("buffer unloaded");
    }

    /// Change the playback multiplier.
    ///
    /// While playing, the live node is retuned immediately and the start
    /// clock is rebased on the position sampled at the old speed, so
    /// progress stays continuous across the change.
    ///
    /// # Errors
    /// `PlaybackError::InvalidSpeed` for values outside
    /// `EngineConfig::supported_speeds`; the previous speed is kept.
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !self.config.is_supported_speed(speed) {
            return Err(PlaybackError::InvalidSpeed(speed));
        }
        let speed = validate_speed(speed)?;

        let mut s = self.state.lock();
        if (s.speed - speed).abs() < SPEED_MATCH_TOLERANCE {
            return Ok(());
        }

        if s.status == PlaybackStatus::Playing {
            let now = self.device.current_time();
            if let (Some((timeline, elapsed)), Some(session)) = (s.elapsed_at(now), s.session) {
                let device_clock_at_start = timeline.start_clock(now, elapsed, speed)?;
                if let Some(node) = s.node.as_ref() {
                    node.set_rate(speed);
                }
                s.session = Some(PlaybackSession {
                    speed,
                    device_clock_at_start,
                    ..session
                });
                debug!(elapsed, speed, device_clock_at_start, "rebased live session");
            }
        }

        let previous = s.speed;
        s.speed = speed;
        info!(from = previous, to = speed, "playback speed changed");
        let status = s.status;
        self.transition(&mut s, status, TransitionCause::SpeedChanged);
        Ok(())
    }

    /// Move the logical position.
    ///
    /// Playing: the live node is replaced by one starting at `offset_secs`.
    /// Stopped/Paused: the offset is stored (a non-zero offset means Paused).
    ///
    /// # Errors
    /// - `PlaybackError::NotLoaded` while Idle.
    /// - `PlaybackError::InvalidOffset` outside `[0, duration)`.
    pub fn seek(&self, offset_secs: f64) -> Result<()> {
        let mut s = self.state.lock();
        let timeline = s
            .loaded
            .as_ref()
            .map(|l| l.timeline)
            .ok_or(PlaybackError::NotLoaded)?;
        if !offset_secs.is_finite() || offset_secs < 0.0 || offset_secs >= timeline.duration_secs()
        {
            return Err(PlaybackError::InvalidOffset(offset_secs));
        }

        s.offset_secs = offset_secs;
        match s.status {
            PlaybackStatus::Playing => self.start_node_locked(&mut s, TransitionCause::Seeked),
            _ => {
                let status = if offset_secs > 0.0 {
                    PlaybackStatus::Paused
                } else {
                    PlaybackStatus::Stopped
                };
                self.transition(&mut s, status, TransitionCause::Seeked);
                Ok(())
            }
        }
    }

    /// Completion detection plus progress publication.
    ///
    /// Call at a steady cadence while playing (see [`ticker`]). Detects the
    /// end of the buffer from either the node's own end signal or the
    /// timeline, and otherwise broadcasts a `ProgressEvent`.
    pub fn tick(&self) -> PlaybackSnapshot {
        let mut s = self.state.lock();
        if s.status == PlaybackStatus::Playing {
            let node_ended = s.node.as_ref().is_some_and(|n| n.has_ended());
            let now = self.device.current_time();
            match s.elapsed_at(now) {
                Some((timeline, elapsed)) if !node_ended && !timeline.has_completed(elapsed) => {
                    let seq = self.progress_seq.fetch_add(1, Ordering::Relaxed);
                    let _ = self.progress_tx.send(ProgressEvent {
                        seq,
                        progress: timeline.progress(elapsed),
                        position_secs: timeline.clamp_position(elapsed),
                    });
                }
                _ => {
                    debug!(node_ended, "end of buffer detected");
                    self.finish_locked(&mut s, TransitionCause::Completed);
                    info!("playback completed");
                }
            }
        }
        self.snapshot_locked(&s)
    }

    /// Sample observable state without changing it.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let s = self.state.lock();
        self.snapshot_locked(&s)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().status
    }

    pub fn is_playing(&self) -> bool {
        self.status().is_playing()
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Current logical position (seconds), clamped to the buffer.
    pub fn position_secs(&self) -> f64 {
        self.snapshot().position_secs
    }

    /// Duration of the loaded buffer, `None` while Idle.
    pub fn duration_secs(&self) -> Option<f64> {
        self.state
            .lock()
            .loaded
            .as_ref()
            .map(|l| l.timeline.duration_secs())
    }

    /// Timing basis of the live node, if one is live.
    pub fn session(&self) -> Option<PlaybackSession> {
        self.state.lock().session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Subscribe to transport transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<PlaybackStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to progress updates emitted by `tick()`.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Stop any live node and start a fresh one at `offset_secs`.
    ///
    /// On failure the engine is left without a node: Paused if it was
    /// playing, otherwise in its prior state.
    fn start_node_locked(
        &self,
        s: &mut EngineState<D::Node>,
        cause: TransitionCause,
    ) -> Result<()> {
        let Some(loaded) = s.loaded.as_ref() else {
            return Err(PlaybackError::NotLoaded);
        };
        let timeline = loaded.timeline;
        let buffer = loaded.buffer.clone();
        let offset_secs = timeline.wrap_offset(s.offset_secs);
        let speed = s.speed;

        let was_playing = s.status == PlaybackStatus::Playing;
        s.release_node();

        let node = match self.device.start_node(&buffer, offset_secs, speed) {
            Ok(node) => node,
            Err(e) => {
                warn!("failed to start render node: {e}");
                if was_playing {
                    self.transition(s, PlaybackStatus::Paused, TransitionCause::Paused);
                }
                return Err(e);
            }
        };

        let now = self.device.current_time();
        let device_clock_at_start = match timeline.start_clock(now, offset_secs, speed) {
            Ok(clock) => clock,
            Err(e) => {
                let mut node = node;
                node.stop();
                return Err(e);
            }
        };

        s.node = Some(node);
        s.session = Some(PlaybackSession {
            speed,
            logical_offset_secs: offset_secs,
            device_clock_at_start,
        });
        s.offset_secs = offset_secs;
        info!(offset_secs, speed, "render node started");
        self.transition(s, PlaybackStatus::Playing, cause);
        Ok(())
    }

    /// Stop, rewind to 0, land in Stopped.
    fn finish_locked(&self, s: &mut EngineState<D::Node>, cause: TransitionCause) {
        s.release_node();
        s.offset_secs = 0.0;
        self.transition(s, PlaybackStatus::Stopped, cause);
    }

    fn transition(
        &self,
        s: &mut EngineState<D::Node>,
        status: PlaybackStatus,
        cause: TransitionCause,
    ) {
        s.status = status;
        let _ = self.status_tx.send(PlaybackStatusEvent {
            status,
            cause,
            offset_secs: s.offset_secs,
        });
    }

    fn snapshot_locked(&self, s: &EngineState<D::Node>) -> PlaybackSnapshot {
        let Some(loaded) = s.loaded.as_ref() else {
            return PlaybackSnapshot::idle(s.speed);
        };
        let timeline = loaded.timeline;

        let position = match s.status {
            PlaybackStatus::Playing => s
                .elapsed_at(self.device.current_time())
                .map(|(_, elapsed)| elapsed)
                .unwrap_or(s.offset_secs),
            _ => s.offset_secs,
        };

        PlaybackSnapshot {
            status: s.status,
            is_playing: s.status.is_playing(),
            progress: timeline.progress(position),
            speed: s.speed,
            position_secs: timeline.clamp_position(position),
            duration_secs: timeline.duration_secs(),
        }
    }
}

impl<D: OutputDevice> Drop for PlaybackEngine<D> {
    fn drop(&mut self) {
        let s = self.state.get_mut();
        if s.node.is_some() {
            debug!("engine dropped while playing, stopping node");
        }
        s.release_node();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stub::StubOutput;
    use approx::assert_abs_diff_eq;

    /// Three seconds of silence at 1 kHz.
    fn three_seconds() -> AudioSampleBuffer {
        AudioSampleBuffer::mono(vec![0.0; 3_000], 1_000).unwrap()
    }

    fn loaded_engine() -> (PlaybackEngine<StubOutput>, StubOutput) {
        let dev = StubOutput::new();
        let engine = PlaybackEngine::new(EngineConfig::default(), dev.clone());
        engine.load(three_seconds()).unwrap();
        (engine, dev)
    }

    #[test]
    fn fresh_engine_is_idle() {
        let engine = PlaybackEngine::new(EngineConfig::default(), StubOutput::new());
        let snap = engine.snapshot();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(!snap.is_playing);
        assert_eq!(snap.progress, 0.0);
        assert_eq!(snap.speed, 1.0);
        assert_eq!(engine.duration_secs(), None);
    }

    #[test]
    fn unsupported_default_speed_falls_back() {
        let config = EngineConfig {
            default_speed: 3.0,
            ..EngineConfig::default()
        };
        let engine = PlaybackEngine::new(config, StubOutput::new());
        assert_eq!(engine.speed(), 1.0);
    }

    #[test]
    fn load_moves_to_stopped() {
        let (engine, _dev) = loaded_engine();
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert_abs_diff_eq!(engine.duration_secs().unwrap(), 3.0, epsilon = 1e-9);
        assert_eq!(engine.position_secs(), 0.0);
    }

    #[test]
    fn speed_menu_membership() {
        let engine = PlaybackEngine::new(EngineConfig::default(), StubOutput::new());
        let config = EngineConfig::default();
        assert!(config.is_supported_speed(1.25));
        assert!(!config.is_supported_speed(1.1));
        assert!(!config.is_supported_speed(f64::NAN));
        assert_eq!(engine.status(), PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn play_starts_one_node_at_offset() {
        let (engine, dev) = loaded_engine();
        dev.set_time(5.0);
        engine.play().await.unwrap();

        assert!(engine.is_playing());
        assert_eq!(dev.live_nodes(), 1);
        let session = engine.session().unwrap();
        assert_abs_diff_eq!(session.device_clock_at_start, 5.0, epsilon = 1e-9);
        assert_eq!(session.logical_offset_secs, 0.0);
    }

    #[tokio::test]
    async fn pause_records_elapsed_position() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        dev.advance(1.2);
        engine.pause();

        assert_eq!(engine.status(), PlaybackStatus::Paused);
        assert_eq!(dev.live_nodes(), 0);
        assert!(engine.session().is_none());
        assert_abs_diff_eq!(engine.position_secs(), 1.2, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn pause_near_end_counts_as_completion() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        dev.advance(2.95);
        engine.pause();

        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert_eq!(engine.position_secs(), 0.0);
    }

    #[tokio::test]
    async fn speed_change_while_playing_keeps_position_continuous() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        dev.advance(1.0);

        let before = engine.position_secs();
        engine.set_speed(2.0).unwrap();
        let after = engine.position_secs();
        assert_abs_diff_eq!(before, after, epsilon = 1e-9);
        assert_eq!(dev.active_node().map(|n| n.rate), Some(2.0));

        dev.advance(0.5);
        assert_abs_diff_eq!(engine.position_secs(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn rejected_speed_keeps_previous() {
        let (engine, _dev) = loaded_engine();
        engine.set_speed(1.5).unwrap();
        let err = engine.set_speed(3.0).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSpeed(v) if v == 3.0));
        assert_eq!(engine.speed(), 1.5);
    }

    #[test]
    fn seek_from_stopped_parks_in_paused() {
        let (engine, dev) = loaded_engine();
        engine.seek(1.5).unwrap();
        assert_eq!(engine.status(), PlaybackStatus::Paused);
        assert_abs_diff_eq!(engine.position_secs(), 1.5, epsilon = 1e-9);
        assert_eq!(dev.nodes_started(), 0);

        engine.seek(0.0).unwrap();
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn seek_out_of_range_is_rejected() {
        let (engine, _dev) = loaded_engine();
        assert!(matches!(engine.seek(3.0), Err(PlaybackError::InvalidOffset(_))));
        assert!(matches!(engine.seek(-0.1), Err(PlaybackError::InvalidOffset(_))));

        let idle = PlaybackEngine::new(EngineConfig::default(), StubOutput::new());
        assert!(matches!(idle.seek(0.5), Err(PlaybackError::NotLoaded)));
    }

    #[tokio::test]
    async fn seek_while_playing_replaces_node() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        dev.advance(0.5);
        engine.seek(2.0).unwrap();

        assert!(engine.is_playing());
        assert_eq!(dev.nodes_started(), 2);
        assert_eq!(dev.live_nodes(), 1);
        assert_eq!(dev.active_node().map(|n| n.offset_secs), Some(2.0));
        assert_abs_diff_eq!(engine.position_secs(), 2.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn tick_publishes_progress_while_playing() {
        let (engine, dev) = loaded_engine();
        let mut progress = engine.subscribe_progress();
        engine.play().await.unwrap();
        dev.advance(1.5);

        let snap = engine.tick();
        assert!(snap.is_playing);
        let event = progress.try_recv().unwrap();
        assert_eq!(event.seq, 0);
        assert_abs_diff_eq!(event.progress, 0.5, epsilon = 1e-9);

        engine.tick();
        assert_eq!(progress.try_recv().unwrap().seq, 1);
    }

    #[test]
    fn tick_is_quiet_when_not_playing() {
        let (engine, _dev) = loaded_engine();
        let mut progress = engine.subscribe_progress();
        let snap = engine.tick();
        assert_eq!(snap.status, PlaybackStatus::Stopped);
        assert!(progress.try_recv().is_err());
    }

    #[tokio::test]
    async fn unload_returns_to_idle() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        engine.unload();

        assert_eq!(engine.status(), PlaybackStatus::Idle);
        assert_eq!(dev.live_nodes(), 0);
        assert!(matches!(engine.play().await, Err(PlaybackError::NotLoaded)));
    }

    #[tokio::test]
    async fn load_replaces_playing_buffer() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        dev.advance(1.0);

        engine
            .load(AudioSampleBuffer::mono(vec![0.0; 500], 1_000).unwrap())
            .unwrap();
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert_eq!(dev.live_nodes(), 0);
        assert_abs_diff_eq!(engine.duration_secs().unwrap(), 0.5, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn dropping_engine_stops_node() {
        let (engine, dev) = loaded_engine();
        engine.play().await.unwrap();
        assert_eq!(dev.live_nodes(), 1);
        drop(engine);
        assert_eq!(dev.live_nodes(), 0);
    }
}
