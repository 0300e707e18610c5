//! `StubOutput`: output device with a manually advanced clock.
//!
//! Renders nothing. Time only moves when the owner calls [`StubOutput::advance`]
//! or [`StubOutput::set_time`], so transport behaviour can be asserted at exact
//! device instants. Clones share state: keep one clone in the test, hand the
//! other to the engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{DeviceState, OutputDevice, RenderNode};
use crate::buffering::AudioSampleBuffer;
use crate::error::{PlaybackError, Result};

/// How `resume()` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeBehavior {
    /// Resolve immediately.
    Immediate,
    /// Fail with `DeviceUnavailable`.
    Fail,
    /// Wait until [`StubOutput::release_resume`] is called.
    Gated,
}

/// Parameters of a started node, as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StubNodeInfo {
    pub offset_secs: f64,
    pub rate: f64,
}

struct StubNodeState {
    offset_secs: f64,
    rate: Mutex<f64>,
    stopped: AtomicBool,
    ended: AtomicBool,
}

impl StubNodeState {
    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.ended.load(Ordering::Acquire)
    }
}

struct StubInner {
    clock: Mutex<f64>,
    state: Mutex<DeviceState>,
    resume_behavior: Mutex<ResumeBehavior>,
    resume_gate: Notify,
    pending_resumes: AtomicUsize,
    resume_calls: AtomicUsize,
    nodes: Mutex<Vec<Arc<StubNodeState>>>,
}

#[derive(Clone)]
pub struct StubOutput {
    inner: Arc<StubInner>,
}

impl StubOutput {
    /// A running device at clock 0.
    pub fn new() -> Self {
        Self::with_state(DeviceState::Running)
    }

    /// A device that needs a resume before the first node can start.
    pub fn suspended() -> Self {
        Self::with_state(DeviceState::Suspended)
    }

    fn with_state(state: DeviceState) -> Self {
        Self {
            inner: Arc::new(StubInner {
                clock: Mutex::new(0.0),
                state: Mutex::new(state),
                resume_behavior: Mutex::new(ResumeBehavior::Immediate),
                resume_gate: Notify::new(),
                pending_resumes: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                nodes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.inner.clock.lock() += secs;
    }

    pub fn set_time(&self, secs: f64) {
        *self.inner.clock.lock() = secs;
    }

    pub fn suspend(&self) {
        *self.inner.state.lock() = DeviceState::Suspended;
    }

    pub fn close(&self) {
        *self.inner.state.lock() = DeviceState::Closed;
    }

    pub fn set_resume_behavior(&self, behavior: ResumeBehavior) {
        *self.inner.resume_behavior.lock() = behavior;
    }

    /// Let one gated `resume()` complete.
    pub fn release_resume(&self) {
        self.inner.resume_gate.notify_one();
    }

    /// Number of `resume()` calls currently parked on the gate.
    pub fn pending_resumes(&self) -> usize {
        self.inner.pending_resumes.load(Ordering::Acquire)
    }

    pub fn resume_calls(&self) -> usize {
        self.inner.resume_calls.load(Ordering::Acquire)
    }

    /// Total nodes ever started on this device.
    pub fn nodes_started(&self) -> usize {
        self.inner.nodes.lock().len()
    }

    /// Nodes neither stopped nor ended.
    pub fn live_nodes(&self) -> usize {
        self.inner.nodes.lock().iter().filter(|n| n.is_live()).count()
    }

    /// The most recently started node, if it is still live.
    pub fn active_node(&self) -> Option<StubNodeInfo> {
        self.inner
            .nodes
            .lock()
            .last()
            .filter(|n| n.is_live())
            .map(|n| StubNodeInfo {
                offset_secs: n.offset_secs,
                rate: *n.rate.lock(),
            })
    }

    /// Simulate the backend's end-of-buffer signal on the live node.
    ///
    /// Returns `false` when no node is live.
    pub fn end_active_node(&self) -> bool {
        let nodes = self.inner.nodes.lock();
        match nodes.last().filter(|n| n.is_live()) {
            Some(node) => {
                node.ended.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

impl Default for StubOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StubOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubOutput")
            .field("clock", &*self.inner.clock.lock())
            .field("state", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

/// Counts a gated resume as pending until it settles or its future is dropped.
struct PendingResume<'a>(&'a AtomicUsize);

impl<'a> PendingResume<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingResume<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl OutputDevice for StubOutput {
    type Node = StubNode;

    fn current_time(&self) -> f64 {
        *self.inner.clock.lock()
    }

    fn state(&self) -> DeviceState {
        *self.inner.state.lock()
    }

    fn resume(&self) -> impl Future<Output = Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.resume_calls.fetch_add(1, Ordering::AcqRel);
            let behavior = *inner.resume_behavior.lock();
            match behavior {
                ResumeBehavior::Immediate => {}
                ResumeBehavior::Fail => {
                    return Err(PlaybackError::DeviceUnavailable(
                        "stub device refused to resume".into(),
                    ));
                }
                ResumeBehavior::Gated => {
                    let _pending = PendingResume::enter(&inner.pending_resumes);
                    inner.resume_gate.notified().await;
                }
            }

            let mut state = inner.state.lock();
            if *state == DeviceState::Closed {
                return Err(PlaybackError::DeviceUnavailable("stub device closed".into()));
            }
            *state = DeviceState::Running;
            debug!("StubOutput resumed");
            Ok(())
        }
    }

    fn start_node(
        &self,
        _buffer: &AudioSampleBuffer,
        offset_secs: f64,
        rate: f64,
    ) -> Result<StubNode> {
        if self.state() != DeviceState::Running {
            return Err(PlaybackError::DeviceUnavailable(format!(
                "cannot start node on {:?} device",
                self.state()
            )));
        }

        let node = Arc::new(StubNodeState {
            offset_secs,
            rate: Mutex::new(rate),
            stopped: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });
        self.inner.nodes.lock().push(Arc::clone(&node));
        debug!(offset_secs, rate, "StubOutput node started");
        Ok(StubNode { state: node })
    }
}

/// Node handle returned by [`StubOutput`].
pub struct StubNode {
    state: Arc<StubNodeState>,
}

impl RenderNode for StubNode {
    fn set_rate(&self, rate: f64) {
        if self.state.is_live() {
            *self.state.rate.lock() = rate;
        }
    }

    fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::Release);
    }

    fn has_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }
}
