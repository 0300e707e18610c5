//! Host application state.
//!
//! `AppState` is shared between the stdin command loop and the event
//! forwarding tasks.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use readaloud_core::{OutputDevice, PlaybackEngine, TransitionCause};
use serde::Serialize;
use tracing::warn;

use crate::settings::{save_settings, AppSettings};

pub struct AppState<D: OutputDevice> {
    /// The transport. Shared with the progress ticker.
    pub engine: Arc<PlaybackEngine<D>>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// Commands parsed and dispatched.
    pub commands_run: AtomicUsize,
    /// Commands rejected by the parser or the engine.
    pub command_errors: AtomicUsize,
    /// Buffers that played to the end on their own.
    pub completions: Arc<AtomicUsize>,
}

impl<D: OutputDevice> AppState<D> {
    pub fn new(engine: Arc<PlaybackEngine<D>>, settings: AppSettings, settings_path: PathBuf) -> Self {
        Self {
            engine,
            settings: Arc::new(Mutex::new(settings)),
            settings_path,
            commands_run: AtomicUsize::new(0),
            command_errors: AtomicUsize::new(0),
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn record_command(&self, ok: bool) {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_transition(&self, cause: TransitionCause) {
        if cause == TransitionCause::Completed {
            self.completions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Persist the engine's current speed as the next session's default.
    pub fn remember_speed(&self) {
        let speed = self.engine.speed();
        let snapshot = {
            let mut settings = self.settings.lock();
            if settings.default_speed == speed {
                return;
            }
            settings.default_speed = speed;
            settings.clone()
        };
        if let Err(e) = save_settings(&self.settings_path, &snapshot) {
            warn!("failed to persist speed preference: {e}");
        }
    }

    pub fn diagnostics_snapshot(&self) -> AppDiagnostics {
        AppDiagnostics {
            commands_run: self.commands_run.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDiagnostics {
    pub commands_run: usize,
    pub command_errors: usize,
    pub completions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::load_settings;
    use readaloud_core::audio::stub::StubOutput;
    use readaloud_core::EngineConfig;

    fn state(path: PathBuf) -> AppState<StubOutput> {
        let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), StubOutput::new()));
        AppState::new(engine, AppSettings::default(), path)
    }

    #[test]
    fn counters_track_commands_and_completions() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path().join("settings.json"));
        state.record_command(true);
        state.record_command(false);
        state.record_transition(TransitionCause::Paused);
        state.record_transition(TransitionCause::Completed);

        assert_eq!(
            state.diagnostics_snapshot(),
            AppDiagnostics {
                commands_run: 2,
                command_errors: 1,
                completions: 1,
            }
        );
    }

    #[test]
    fn remembered_speed_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let state = state(path.clone());

        state.engine.set_speed(1.5).unwrap();
        state.remember_speed();

        assert_eq!(load_settings(&path).default_speed, 1.5);
    }
}
