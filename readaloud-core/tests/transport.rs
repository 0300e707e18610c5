use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use readaloud_core::audio::stub::{ResumeBehavior, StubOutput};
use readaloud_core::{
    AudioSampleBuffer, AudioTimeline, EngineConfig, PlaybackEngine, PlaybackError, PlaybackStatus,
    TransitionCause,
};
use tokio::sync::broadcast::error::TryRecvError;

const RATE: u32 = 24_000;

fn buffer_secs(secs: f64) -> AudioSampleBuffer {
    let frames = (secs * RATE as f64).round() as usize;
    AudioSampleBuffer::mono(vec![0.0; frames], RATE).unwrap()
}

fn engine_with(secs: f64) -> (Arc<PlaybackEngine<StubOutput>>, StubOutput) {
    let dev = StubOutput::new();
    let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), dev.clone()));
    engine.load(buffer_secs(secs)).unwrap();
    (engine, dev)
}

async fn wait_for_pending_resume(dev: &StubOutput) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while dev.pending_resumes() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("play() never reached the device resume");
}

#[test]
fn full_playback_round_trip_recovers_duration() {
    for &duration in &[0.25, 1.0, 3.0, 42.5] {
        let timeline = AudioTimeline::new(duration).unwrap();
        for &speed in &[0.5, 0.75, 1.0, 1.25, 1.5, 2.0] {
            let t0 = 17.0;
            let start = timeline.start_clock(t0, 0.0, speed).unwrap();
            let elapsed = timeline.elapsed(start + duration / speed, start, speed).unwrap();
            assert_abs_diff_eq!(elapsed, duration, epsilon = 1e-9);
        }
    }
}

#[tokio::test]
async fn second_play_is_a_no_op() {
    let (engine, dev) = engine_with(3.0);
    dev.set_time(1.0);
    engine.play().await.unwrap();
    let session = engine.session();

    dev.advance(0.4);
    engine.play().await.unwrap();

    assert!(engine.is_playing());
    assert_eq!(engine.session(), session);
    assert_eq!(dev.nodes_started(), 1);
    assert_eq!(dev.live_nodes(), 1);
}

#[tokio::test]
async fn pause_then_play_continues_from_offset() {
    let (engine, dev) = engine_with(5.0);
    engine.play().await.unwrap();
    dev.advance(2.0);
    engine.pause();

    assert_eq!(engine.status(), PlaybackStatus::Paused);
    assert_abs_diff_eq!(engine.position_secs(), 2.0, epsilon = 1e-6);

    dev.advance(10.0);
    assert_abs_diff_eq!(engine.position_secs(), 2.0, epsilon = 1e-6);

    engine.play().await.unwrap();
    let node = dev.active_node().expect("node should be live");
    assert_abs_diff_eq!(node.offset_secs, 2.0, epsilon = 1e-6);
    dev.advance(0.5);
    assert_abs_diff_eq!(engine.position_secs(), 2.5, epsilon = 1e-6);
}

#[tokio::test]
async fn natural_completion_happens_within_epsilon_of_end() {
    let (engine, dev) = engine_with(3.0);
    let mut status = engine.subscribe_status();
    engine.play().await.unwrap();

    let mut stopped_at = None;
    for step in 1..=80 {
        let t = step as f64 * 0.05;
        dev.set_time(t);
        if !engine.tick().is_playing {
            stopped_at = Some(t);
            break;
        }
    }

    let stopped_at = stopped_at.expect("playback never completed");
    assert!(stopped_at >= 2.8, "stopped too early at {stopped_at}");
    assert!(stopped_at >= 2.9 - 1e-9, "stopped before duration - epsilon at {stopped_at}");
    assert!(stopped_at <= 2.95 + 1e-9, "stopped late at {stopped_at}");

    let snap = engine.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Stopped);
    assert_eq!(snap.position_secs, 0.0);
    assert_eq!(snap.progress, 0.0);
    assert_eq!(dev.live_nodes(), 0);

    let causes: Vec<_> = std::iter::from_fn(|| status.try_recv().ok())
        .map(|ev| ev.cause)
        .collect();
    assert_eq!(causes, vec![TransitionCause::Started, TransitionCause::Completed]);
}

#[tokio::test]
async fn node_end_signal_completes_playback() {
    let (engine, dev) = engine_with(3.0);
    engine.play().await.unwrap();
    dev.advance(1.0);
    assert!(dev.end_active_node());

    let snap = engine.tick();
    assert!(!snap.is_playing);
    assert_eq!(snap.status, PlaybackStatus::Stopped);
    assert_eq!(snap.position_secs, 0.0);
}

#[tokio::test]
async fn speed_change_rebases_progress() {
    let (engine, dev) = engine_with(5.0);
    engine.play().await.unwrap();
    dev.advance(1.0);
    engine.set_speed(2.0).unwrap();
    dev.advance(1.0);

    let snap = engine.snapshot();
    assert_abs_diff_eq!(snap.progress, 0.6, epsilon = 1e-6);
    assert_eq!(snap.speed, 2.0);
    assert_eq!(dev.nodes_started(), 1);
}

#[tokio::test]
async fn speed_set_while_paused_applies_on_next_play() {
    let (engine, dev) = engine_with(5.0);
    engine.play().await.unwrap();
    dev.advance(1.0);
    engine.pause();
    engine.set_speed(0.5).unwrap();
    assert_eq!(dev.live_nodes(), 0);

    engine.play().await.unwrap();
    assert_eq!(dev.active_node().map(|n| n.rate), Some(0.5));
    dev.advance(2.0);
    assert_abs_diff_eq!(engine.position_secs(), 2.0, epsilon = 1e-6);
}

#[test]
fn invalid_inputs_are_rejected() {
    let empty = AudioSampleBuffer::mono(Vec::new(), RATE);
    assert!(matches!(empty, Err(PlaybackError::InvalidBuffer(_))));

    let (engine, _dev) = engine_with(1.0);
    engine.set_speed(1.25).unwrap();
    let err = engine.set_speed(7.3).unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidSpeed(v) if v == 7.3));
    assert_eq!(engine.speed(), 1.25);
}

#[tokio::test]
async fn reset_from_every_state_rewinds() {
    let (engine, dev) = engine_with(3.0);

    // Stopped
    engine.reset();
    let snap = engine.snapshot();
    assert!(!snap.is_playing);
    assert_eq!(snap.progress, 0.0);

    // Playing
    engine.play().await.unwrap();
    dev.advance(1.0);
    engine.reset();
    let snap = engine.snapshot();
    assert!(!snap.is_playing);
    assert_eq!(snap.progress, 0.0);
    assert_eq!(dev.live_nodes(), 0);

    // Paused
    engine.play().await.unwrap();
    dev.advance(1.0);
    engine.pause();
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    engine.reset();
    let snap = engine.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Stopped);
    assert_eq!(snap.progress, 0.0);
    assert_eq!(dev.live_nodes(), 0);
}

#[tokio::test]
async fn play_resumes_suspended_device_first() {
    let dev = StubOutput::suspended();
    let engine = PlaybackEngine::new(EngineConfig::default(), dev.clone());
    engine.load(buffer_secs(2.0)).unwrap();

    engine.play().await.unwrap();
    assert_eq!(dev.resume_calls(), 1);
    assert!(engine.is_playing());
    assert_eq!(dev.live_nodes(), 1);
}

#[tokio::test]
async fn failed_resume_leaves_state_untouched() {
    let dev = StubOutput::suspended();
    dev.set_resume_behavior(ResumeBehavior::Fail);
    let engine = PlaybackEngine::new(EngineConfig::default(), dev.clone());
    engine.load(buffer_secs(2.0)).unwrap();
    engine.seek(0.5).unwrap();

    let err = engine.play().await.unwrap_err();
    assert!(matches!(err, PlaybackError::DeviceUnavailable(_)));
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    assert_abs_diff_eq!(engine.position_secs(), 0.5, epsilon = 1e-9);
    assert_eq!(dev.nodes_started(), 0);
}

#[tokio::test]
async fn reset_during_resume_cancels_start() {
    let dev = StubOutput::suspended();
    dev.set_resume_behavior(ResumeBehavior::Gated);
    let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), dev.clone()));
    engine.load(buffer_secs(2.0)).unwrap();

    let pending = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.play().await }
    });
    wait_for_pending_resume(&dev).await;

    engine.reset();
    dev.release_resume();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(PlaybackError::Cancelled)));
    assert_eq!(engine.status(), PlaybackStatus::Stopped);
    assert_eq!(dev.nodes_started(), 0);
}

#[tokio::test]
async fn reset_releases_play_gate_without_waiting_for_device() {
    let dev = StubOutput::suspended();
    dev.set_resume_behavior(ResumeBehavior::Gated);
    let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), dev.clone()));
    engine.load(buffer_secs(2.0)).unwrap();

    let stale = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.play().await }
    });
    wait_for_pending_resume(&dev).await;

    engine.reset();
    let stale = tokio::time::timeout(Duration::from_millis(300), stale)
        .await
        .expect("cancelled play() kept waiting on the device");
    assert!(matches!(stale.unwrap(), Err(PlaybackError::Cancelled)));
    assert_eq!(dev.pending_resumes(), 0);

    dev.set_resume_behavior(ResumeBehavior::Immediate);
    let fresh = tokio::time::timeout(Duration::from_millis(300), engine.play())
        .await
        .expect("play() after reset blocked on the abandoned resume");
    fresh.unwrap();
    assert!(engine.is_playing());
    assert_eq!(dev.live_nodes(), 1);
}

#[tokio::test]
async fn pause_during_resume_lands_in_paused() {
    let dev = StubOutput::suspended();
    dev.set_resume_behavior(ResumeBehavior::Gated);
    let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), dev.clone()));
    engine.load(buffer_secs(2.0)).unwrap();
    engine.seek(0.5).unwrap();
    let mut status = engine.subscribe_status();

    let pending = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.play().await }
    });
    wait_for_pending_resume(&dev).await;

    engine.pause();
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    dev.release_resume();

    pending.await.unwrap().unwrap();
    assert_eq!(engine.status(), PlaybackStatus::Paused);
    assert!(!engine.is_playing());
    assert_eq!(dev.nodes_started(), 1);
    assert_eq!(dev.live_nodes(), 0);

    let events: Vec<_> = std::iter::from_fn(|| status.try_recv().ok()).collect();
    let trail: Vec<_> = events.iter().map(|e| (e.status, e.cause)).collect();
    assert_eq!(
        trail,
        vec![
            (PlaybackStatus::Playing, TransitionCause::Started),
            (PlaybackStatus::Paused, TransitionCause::Paused),
        ]
    );
    assert_abs_diff_eq!(events[1].offset_secs, 0.5, epsilon = 1e-6);
}

#[tokio::test]
async fn overlapping_plays_start_one_node() {
    let dev = StubOutput::suspended();
    dev.set_resume_behavior(ResumeBehavior::Gated);
    let engine = Arc::new(PlaybackEngine::new(EngineConfig::default(), dev.clone()));
    engine.load(buffer_secs(2.0)).unwrap();

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.play().await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.play().await }
    });
    wait_for_pending_resume(&dev).await;
    dev.release_resume();

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(dev.resume_calls(), 1);
    assert_eq!(dev.nodes_started(), 1);
    assert!(engine.is_playing());
}

#[tokio::test]
async fn status_events_follow_transport() {
    let dev = StubOutput::new();
    let engine = PlaybackEngine::new(EngineConfig::default(), dev.clone());
    let mut status = engine.subscribe_status();

    engine.load(buffer_secs(3.0)).unwrap();
    engine.play().await.unwrap();
    dev.advance(1.0);
    engine.pause();
    engine.seek(2.0).unwrap();
    engine.unload();

    let events: Vec<_> = std::iter::from_fn(|| status.try_recv().ok()).collect();
    let trail: Vec<_> = events.iter().map(|e| (e.status, e.cause)).collect();
    assert_eq!(
        trail,
        vec![
            (PlaybackStatus::Stopped, TransitionCause::Loaded),
            (PlaybackStatus::Playing, TransitionCause::Started),
            (PlaybackStatus::Paused, TransitionCause::Paused),
            (PlaybackStatus::Paused, TransitionCause::Seeked),
            (PlaybackStatus::Idle, TransitionCause::Unloaded),
        ]
    );
    assert_abs_diff_eq!(events[2].offset_secs, 1.0, epsilon = 1e-6);
    assert!(matches!(status.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn progress_is_monotonic_while_playing() {
    let (engine, dev) = engine_with(4.0);
    let mut progress = engine.subscribe_progress();
    engine.play().await.unwrap();

    for _ in 0..10 {
        dev.advance(0.25);
        engine.tick();
    }

    let events: Vec<_> = std::iter::from_fn(|| progress.try_recv().ok()).collect();
    assert_eq!(events.len(), 10);
    assert!(events.windows(2).all(|w| w[1].seq > w[0].seq));
    assert!(events.windows(2).all(|w| w[1].progress >= w[0].progress));
    assert_abs_diff_eq!(events[9].progress, 2.5 / 4.0, epsilon = 1e-6);
}
