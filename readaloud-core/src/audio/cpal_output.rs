//! Audio output via cpal backend.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalOutput` therefore parks the stream on a dedicated thread that
//! creates it, drives it through a command channel, and drops it. The
//! handle itself is `Send + Sync` and can live inside the engine.
//!
//! # Render callback
//!
//! The callback renders at most one voice (the live node) from a buffer that
//! was converted to the device rate when the node was started. Speed is
//! applied here by stepping through that buffer `rate` frames per output
//! frame with linear interpolation, so pitch follows speed.
//!
//! # Device clock
//!
//! `current_time()` is frames rendered / device rate. It only advances while
//! the stream is playing, which is exactly the suspended/running contract the
//! engine expects.

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{resample::resample_buffer, DeviceState, OutputDevice, RenderNode};
use crate::buffering::AudioSampleBuffer;
use crate::error::{PlaybackError, Result};

/// Only one output handle may be acquired per process.
static DEVICE_HELD: AtomicBool = AtomicBool::new(false);

enum DeviceCommand {
    Resume(oneshot::Sender<Result<()>>),
    Suspend,
    Shutdown,
}

/// Per-node control block shared between the node handle and the callback.
struct VoiceControl {
    /// f64 rate stored as bits.
    rate_bits: AtomicU64,
    stopped: AtomicBool,
    ended: AtomicBool,
}

struct Voice {
    /// Samples at the device rate.
    samples: Arc<[f32]>,
    /// Fractional read position, in device-rate frames.
    position: f64,
    control: Arc<VoiceControl>,
}

/// Device-rate copy of the most recently started asset.
struct ConvertedAsset {
    source: AudioSampleBuffer,
    device_rate: u32,
    samples: Arc<[f32]>,
}

struct OutputShared {
    frames_rendered: AtomicU64,
    device_rate: AtomicU32,
    state: Mutex<DeviceState>,
    voice: Mutex<Option<Voice>>,
    converted: Mutex<Option<ConvertedAsset>>,
}

impl OutputShared {
    /// Fill `out` with the live voice (mono), silence otherwise.
    fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        // Never block the audio thread: a contended slot renders one buffer of silence.
        let Some(mut slot) = self.voice.try_lock() else {
            self.frames_rendered
                .fetch_add(out.len() as u64, Ordering::Relaxed);
            return;
        };
        let finished = match slot.as_mut() {
            Some(voice) if voice.control.stopped.load(Ordering::Acquire) => true,
            Some(voice) => {
                let rate = f64::from_bits(voice.control.rate_bits.load(Ordering::Relaxed));
                let len = voice.samples.len();
                for sample in out.iter_mut() {
                    let idx = voice.position as usize;
                    if idx >= len {
                        break;
                    }
                    let frac = (voice.position - idx as f64) as f32;
                    let a = voice.samples[idx];
                    let b = voice.samples.get(idx + 1).copied().unwrap_or(0.0);
                    *sample = a + (b - a) * frac;
                    voice.position += rate;
                }
                if voice.position >= len as f64 {
                    voice.control.ended.store(true, Ordering::Release);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if finished {
            *slot = None;
        }
        drop(slot);

        self.frames_rendered
            .fetch_add(out.len() as u64, Ordering::Relaxed);
    }
}

struct Worker {
    cmd_tx: Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

/// Handle to the system audio output.
///
/// The device is acquired lazily on the first `resume()` and released when
/// this value is dropped.
pub struct CpalOutput {
    preferred_device: Option<String>,
    shared: Arc<OutputShared>,
    worker: Mutex<Option<Worker>>,
}

impl CpalOutput {
    /// Prepare an output handle. No device is opened yet.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            shared: Arc::new(OutputShared {
                frames_rendered: AtomicU64::new(0),
                device_rate: AtomicU32::new(0),
                state: Mutex::new(DeviceState::Suspended),
                voice: Mutex::new(None),
                converted: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Output sample rate, once the device has been opened.
    pub fn device_rate(&self) -> Option<u32> {
        match self.shared.device_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate),
        }
    }

    /// Pause the stream. The device clock stops until the next resume.
    pub fn suspend(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            let _ = worker.cmd_tx.send(DeviceCommand::Suspend);
        }
    }

    /// Spawn the output thread if it is not running.
    ///
    /// Returns the command sender and, when a thread was just spawned, the
    /// receiver for its open result.
    fn ensure_worker(
        &self,
    ) -> Result<(Sender<DeviceCommand>, Option<oneshot::Receiver<Result<u32>>>)> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            let alive = worker
                .thread
                .as_ref()
                .map(|t| !t.is_finished())
                .unwrap_or(false);
            if alive {
                return Ok((worker.cmd_tx.clone(), None));
            }
        }

        if DEVICE_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlaybackError::DeviceUnavailable(
                "output device already held by another engine".into(),
            ));
        }

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (open_tx, open_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let preferred = self.preferred_device.clone();

        let thread = std::thread::Builder::new()
            .name("readaloud-output".into())
            .spawn(move || run_output_thread(preferred, shared, cmd_rx, open_tx))
            .map_err(|e| {
                DEVICE_HELD.store(false, Ordering::Release);
                PlaybackError::DeviceUnavailable(format!("spawn output thread: {e}"))
            })?;

        *slot = Some(Worker {
            cmd_tx: cmd_tx.clone(),
            thread: Some(thread),
        });
        Ok((cmd_tx, Some(open_rx)))
    }

    /// Device-rate samples for `buffer`, converting once per asset.
    fn converted_samples(&self, buffer: &AudioSampleBuffer, device_rate: u32) -> Result<Arc<[f32]>> {
        let mut cache = self.shared.converted.lock();
        if let Some(asset) = cache.as_ref() {
            if asset.device_rate == device_rate && asset.source.same_asset(buffer) {
                return Ok(Arc::clone(&asset.samples));
            }
        }

        let samples: Arc<[f32]> = if buffer.sample_rate() == device_rate {
            buffer.shared_samples()
        } else {
            resample_buffer(buffer.samples(), buffer.sample_rate(), device_rate)?.into()
        };
        debug!(
            from = buffer.sample_rate(),
            to = device_rate,
            frames = samples.len(),
            "converted buffer to device rate"
        );
        *cache = Some(ConvertedAsset {
            source: buffer.clone(),
            device_rate,
            samples: Arc::clone(&samples),
        });
        Ok(samples)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.lock().take() {
            let _ = worker.cmd_tx.send(DeviceCommand::Shutdown);
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    error!("output thread panicked during shutdown");
                }
            }
        }
    }
}

impl OutputDevice for CpalOutput {
    type Node = CpalNode;

    fn current_time(&self) -> f64 {
        let rate = self.shared.device_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        self.shared.frames_rendered.load(Ordering::Relaxed) as f64 / rate as f64
    }

    fn state(&self) -> DeviceState {
        *self.shared.state.lock()
    }

    fn resume(&self) -> impl Future<Output = Result<()>> + Send {
        let opened = self.ensure_worker();
        async move {
            let (cmd_tx, open_rx) = opened?;
            if let Some(open_rx) = open_rx {
                let rate = open_rx.await.map_err(|_| {
                    PlaybackError::DeviceUnavailable("output thread died while opening".into())
                })??;
                info!(sample_rate = rate, "output device acquired");
            }

            let (reply_tx, reply_rx) = oneshot::channel();
            cmd_tx
                .send(DeviceCommand::Resume(reply_tx))
                .map_err(|_| PlaybackError::DeviceUnavailable("output thread gone".into()))?;
            reply_rx.await.map_err(|_| {
                PlaybackError::DeviceUnavailable("output thread dropped resume request".into())
            })?
        }
    }

    fn start_node(
        &self,
        buffer: &AudioSampleBuffer,
        offset_secs: f64,
        rate: f64,
    ) -> Result<CpalNode> {
        let state = self.state();
        let device_rate = self.shared.device_rate.load(Ordering::Acquire);
        if state != DeviceState::Running || device_rate == 0 {
            return Err(PlaybackError::DeviceUnavailable(format!(
                "cannot start node on {state:?} device"
            )));
        }

        let samples = self.converted_samples(buffer, device_rate)?;
        let control = Arc::new(VoiceControl {
            rate_bits: AtomicU64::new(rate.to_bits()),
            stopped: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });

        let previous = self.shared.voice.lock().replace(Voice {
            samples,
            position: offset_secs.max(0.0) * device_rate as f64,
            control: Arc::clone(&control),
        });
        if let Some(previous) = previous {
            if !previous.control.stopped.swap(true, Ordering::AcqRel)
                && !previous.control.ended.load(Ordering::Acquire)
            {
                warn!("starting a node while another was still live; stopped it");
            }
        }

        Ok(CpalNode { control })
    }
}

/// Live render handle for [`CpalOutput`].
pub struct CpalNode {
    control: Arc<VoiceControl>,
}

impl RenderNode for CpalNode {
    fn set_rate(&self, rate: f64) {
        self.control.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.control.stopped.store(true, Ordering::Release);
    }

    fn has_ended(&self) -> bool {
        self.control.ended.load(Ordering::Acquire)
    }
}

fn run_output_thread(
    preferred: Option<String>,
    shared: Arc<OutputShared>,
    cmd_rx: Receiver<DeviceCommand>,
    open_tx: oneshot::Sender<Result<u32>>,
) {
    let stream = match open_stream(preferred.as_deref(), &shared) {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to open output device: {e}");
            let _ = open_tx.send(Err(e));
            DEVICE_HELD.store(false, Ordering::Release);
            return;
        }
    };

    // Some hosts start streams eagerly; hold it until the first resume.
    if let Err(e) = stream.pause() {
        debug!("initial stream pause not supported: {e}");
    }
    *shared.state.lock() = DeviceState::Suspended;
    let _ = open_tx.send(Ok(shared.device_rate.load(Ordering::Acquire)));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DeviceCommand::Resume(reply) => {
                let outcome = stream
                    .play()
                    .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()));
                if outcome.is_ok() {
                    *shared.state.lock() = DeviceState::Running;
                    debug!("output stream running");
                }
                let _ = reply.send(outcome);
            }
            DeviceCommand::Suspend => match stream.pause() {
                Ok(()) => {
                    *shared.state.lock() = DeviceState::Suspended;
                    debug!("output stream suspended");
                }
                Err(e) => warn!("failed to suspend output stream: {e}"),
            },
            DeviceCommand::Shutdown => break,
        }
    }

    // Stream drops here, releasing the audio device on this thread.
    drop(stream);
    *shared.voice.lock() = None;
    *shared.state.lock() = DeviceState::Closed;
    DEVICE_HELD.store(false, Ordering::Release);
    info!("output device released");
}

/// Pick a device (preferred name → default → first available) and build a
/// stream for its default output config.
fn open_stream(preferred: Option<&str>, shared: &Arc<OutputShared>) -> Result<Stream> {
    let host = cpal::default_host();
    let mut selected = None;

    if let Some(preferred_name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                selected = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if selected.is_none() {
                    warn!("preferred output device '{preferred_name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
        }
    }

    let device = match selected.or_else(|| host.default_output_device()) {
        Some(device) => device,
        None => {
            let mut devices = host
                .output_devices()
                .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
            warn!("no default output device, falling back to first available output");
            devices.next().ok_or_else(|| {
                PlaybackError::DeviceUnavailable("no output device found".into())
            })?
        }
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, "output config selected");

    let config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    shared.device_rate.store(sample_rate, Ordering::Release);

    match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(shared)),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(shared)),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(shared)),
        fmt => Err(PlaybackError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<OutputShared>,
) -> Result<Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    // Grows to the largest callback size once, then reused.
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                shared.render(&mut mono);
                for (frame, &value) in data.chunks_mut(channels).zip(mono.iter()) {
                    let converted = <T as cpal::Sample>::from_sample(value);
                    frame.fill(converted);
                }
            },
            |err| error!("audio output stream error: {err}"),
            None,
        )
        .map_err(|e| PlaybackError::AudioStream(e.to_string()))
}
