//! Background task that drives `PlaybackEngine::tick` at a fixed cadence.
//!
//! The engine never polls on its own; completion detection and progress
//! events both come from `tick()`. One ticker per engine is enough.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::PlaybackEngine;
use crate::audio::OutputDevice;

/// Handle to a running progress ticker. Dropping it stops the task.
pub struct ProgressTicker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the task to exit after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a ticker on the current tokio runtime.
///
/// Ticks only while the engine is playing, so progress stays stable while
/// paused and no events are emitted for an idle engine.
pub fn spawn_progress_ticker<D: OutputDevice>(
    engine: Arc<PlaybackEngine<D>>,
    interval: Duration,
) -> ProgressTicker {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let period = interval.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut clock = tokio::time::interval(period);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(period_ms = period.as_millis() as u64, "progress ticker started");

        while flag.load(Ordering::Acquire) {
            clock.tick().await;
            if !flag.load(Ordering::Acquire) {
                break;
            }
            if engine.is_playing() {
                engine.tick();
            }
        }
        debug!("progress ticker stopped");
    });

    ProgressTicker {
        running,
        handle: Some(handle),
    }
}
