// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Context
//!
//! Everything a pipeline engine needs while a run is live, bundled in one
//! shared structure: the immutable settings, the mutable runtime controls
//! (frame budget, tokens, policies - the knobs the duration timer and the
//! auto-tuner turn), the admission layer, the frame ring, the kernel
//! registry, the device queues, the metric accumulators, and the run
//! clock.
//!
//! ## Frame Accounting
//!
//! The input side serializes on [`RunContext::next_frame`], which stamps a
//! monotonic frame number and applies the decoupled entry decision while
//! holding the input lock - frames enter the pipeline in id order. The
//! output side reports through [`RunContext::mark_frame_completed`];
//! [`RunContext::wait_for_drain`] lets an engine block until every issued
//! frame has been recycled before shutting its workers down.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hybrid_pipeline_domain::entities::{Frame, StageMetrics};
use hybrid_pipeline_domain::value_objects::{AcquisitionMode, CouplingMode, DeviceKind, StagePolicy};
use hybrid_pipeline_domain::PipelineError;

use crate::application::path_selector;
use crate::application::settings::RunSettings;
use crate::infrastructure::device::DeviceQueues;
use crate::infrastructure::runtime::{FrameRing, ResourceManager};
use crate::infrastructure::stages::{SharedInputs, StageRegistry};

/// Mutable runtime knobs shared by engines, the duration timer, and the
/// auto-tuner.
#[derive(Debug)]
pub struct RunControls {
    num_frames: AtomicUsize,
    duration_pending: AtomicBool,
    sampling_pending: AtomicBool,
    tokens: AtomicUsize,
    auto_mode: AtomicBool,
    coupling: RwLock<CouplingMode>,
    policies: RwLock<Vec<StagePolicy>>,
    priorities: RwLock<Vec<DeviceKind>>,
    config_label: Mutex<String>,
    sample_frames: AtomicUsize,
}

impl RunControls {
    fn from_settings(settings: &RunSettings) -> Self {
        Self {
            num_frames: AtomicUsize::new(settings.num_frames),
            duration_pending: AtomicBool::new(settings.duration.is_some()),
            sampling_pending: AtomicBool::new(settings.sampling_window.is_some()),
            tokens: AtomicUsize::new(settings.tokens),
            auto_mode: AtomicBool::new(settings.auto_tune),
            coupling: RwLock::new(settings.coupling),
            policies: RwLock::new(settings.policies.clone()),
            priorities: RwLock::new(settings.priorities.clone()),
            config_label: Mutex::new(settings.config_label.clone()),
            sample_frames: AtomicUsize::new(0),
        }
    }

    /// Current frame budget.
    pub fn num_frames(&self) -> usize {
        self.num_frames.load(Ordering::Acquire)
    }

    /// Whether a duration timer still drives termination.
    pub fn duration_pending(&self) -> bool {
        self.duration_pending.load(Ordering::Acquire)
    }

    /// Called by the duration timer: freeze the budget at `issued` frames
    /// and stop admitting new ones.
    pub fn freeze_budget(&self, issued: usize) {
        self.num_frames.store(issued, Ordering::Release);
        self.duration_pending.store(false, Ordering::Release);
        tracing::info!(frames = issued, "duration expired, frame budget frozen");
    }

    /// Whether the sampling window is still open.
    pub fn sampling_pending(&self) -> bool {
        self.sampling_pending.load(Ordering::Acquire)
    }

    /// Called by the sampling timer on expiry.
    pub fn expire_sampling(&self) {
        self.sampling_pending.store(false, Ordering::Release);
    }

    pub fn tokens(&self) -> usize {
        self.tokens.load(Ordering::Acquire)
    }

    pub fn set_tokens(&self, tokens: usize) {
        self.tokens.store(tokens, Ordering::Release);
    }

    /// Whether the auto-tuner is still armed.
    pub fn auto_mode(&self) -> bool {
        self.auto_mode.load(Ordering::Acquire)
    }

    /// One-shot disarm; returns whether this caller won the latch.
    pub fn disarm_auto(&self) -> bool {
        self.auto_mode.swap(false, Ordering::AcqRel)
    }

    pub fn coupling(&self) -> CouplingMode {
        *self.coupling.read()
    }

    pub fn set_coupling(&self, coupling: CouplingMode) {
        *self.coupling.write() = coupling;
    }

    pub fn policy(&self, stage: usize) -> StagePolicy {
        self.policies.read()[stage]
    }

    pub fn policies(&self) -> Vec<StagePolicy> {
        self.policies.read().clone()
    }

    pub fn set_policies(&self, policies: Vec<StagePolicy>) {
        *self.policies.write() = policies;
    }

    pub fn priority(&self, stage: usize) -> DeviceKind {
        self.priorities.read()[stage]
    }

    pub fn set_priorities(&self, priorities: Vec<DeviceKind>) {
        *self.priorities.write() = priorities;
    }

    pub fn config_label(&self) -> String {
        self.config_label.lock().clone()
    }

    pub fn set_config_label(&self, label: String) {
        *self.config_label.lock() = label;
    }

    pub fn sample_frames(&self) -> usize {
        self.sample_frames.load(Ordering::Acquire)
    }

    pub fn set_sample_frames(&self, frames: usize) {
        self.sample_frames.store(frames, Ordering::Release);
    }
}

/// Wall-clock landmarks of one run.
#[derive(Debug, Default)]
pub struct RunClock {
    pipeline_start: Mutex<Option<Instant>>,
    pipeline_end: Mutex<Option<Instant>>,
    sample_end: Mutex<Option<Instant>>,
    system_start: Mutex<Option<Instant>>,
}

impl RunClock {
    pub fn mark_start(&self) {
        *self.pipeline_start.lock() = Some(Instant::now());
    }

    pub fn mark_end(&self) {
        *self.pipeline_end.lock() = Some(Instant::now());
    }

    pub fn mark_sample_end(&self) {
        *self.sample_end.lock() = Some(Instant::now());
    }

    pub fn mark_system_start(&self) {
        *self.system_start.lock() = Some(Instant::now());
    }

    fn span_ms(from: Option<Instant>, to: Option<Instant>) -> Option<f64> {
        match (from, to) {
            (Some(from), Some(to)) => Some(to.duration_since(from).as_secs_f64() * 1e3),
            _ => None,
        }
    }

    /// Full pipeline time in milliseconds.
    pub fn total_ms(&self) -> Option<f64> {
        Self::span_ms(*self.pipeline_start.lock(), *self.pipeline_end.lock())
    }

    /// Time from pipeline start to the end of the sampling phase.
    pub fn sample_ms(&self) -> Option<f64> {
        Self::span_ms(*self.pipeline_start.lock(), *self.sample_end.lock())
    }

    /// Time from reconfiguration commit to pipeline end.
    pub fn system_ms(&self) -> Option<f64> {
        Self::span_ms(*self.system_start.lock(), *self.pipeline_end.lock())
    }
}

/// What the auto-tuner committed, for the summary and the report record.
#[derive(Debug, Clone)]
pub struct TuningReport {
    pub config_label: String,
    pub sample_frames: usize,
    pub sample_time_ms: f64,
    pub throughput_balance_fps: f64,
    pub throughput_expected_fps: f64,
    pub tokens: usize,
}

/// A timer that fires an action once, unless cancelled first.
pub struct CancellableTimer {
    cancel: Arc<(Mutex<bool>, Condvar)>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for CancellableTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableTimer").finish()
    }
}

impl CancellableTimer {
    /// Schedules `action` to run after `delay` on a named thread.
    pub fn schedule(name: &str, delay: Duration, action: impl FnOnce() + Send + 'static) -> Self {
        let cancel = Arc::new((Mutex::new(false), Condvar::new()));
        let flag = Arc::clone(&cancel);
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (lock, condvar) = &*flag;
                let mut cancelled = lock.lock();
                if !*cancelled {
                    condvar.wait_for(&mut cancelled, delay);
                }
                if !*cancelled {
                    drop(cancelled);
                    action();
                }
            })
            .expect("failed to spawn timer thread");
        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Cancels the timer if it has not fired and joins the thread.
    pub fn cancel(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        let (lock, condvar) = &*self.cancel;
        *lock.lock() = true;
        condvar.notify_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

/// Shared state of one live run.
pub struct RunContext {
    pub settings: RunSettings,
    pub controls: RunControls,
    pub metrics: StageMetrics,
    pub manager: Arc<ResourceManager>,
    pub ring: FrameRing,
    pub registry: StageRegistry,
    pub inputs: SharedInputs,
    pub queues: DeviceQueues,
    pub clock: RunClock,
    pub tuning: Mutex<Option<TuningReport>>,
    pub timers: Mutex<Vec<CancellableTimer>>,
    issued: AtomicUsize,
    input_lock: Mutex<()>,
    completed: Mutex<usize>,
    drained: Condvar,
    failure: Mutex<Option<PipelineError>>,
}

impl RunContext {
    /// Assembles a run context from resolved settings.
    pub fn new(settings: RunSettings) -> Result<Arc<Self>, PipelineError> {
        let manager = Arc::new(settings.build_resources());
        let registry = settings.build_registry()?;
        let inputs = SharedInputs::synthesize(settings.geometry);
        let ring = FrameRing::new(settings.ring_capacity, &settings.geometry, settings.num_stages);
        let queues = DeviceQueues::new(settings.threads);
        let metrics = StageMetrics::new(settings.num_stages);
        let controls = RunControls::from_settings(&settings);

        Ok(Arc::new(Self {
            controls,
            metrics,
            manager,
            ring,
            registry,
            inputs,
            queues,
            clock: RunClock::default(),
            tuning: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            input_lock: Mutex::new(()),
            completed: Mutex::new(0),
            drained: Condvar::new(),
            failure: Mutex::new(None),
            settings,
        }))
    }

    /// Serialized input step: claims the next frame if the budget allows,
    /// stamps it, and applies the decoupled entry decision.
    ///
    /// Returns `None` once the budget is exhausted and the duration (if
    /// any) expired - the engine's signal to stop its input loop.
    pub fn next_frame(self: &Arc<Self>) -> Option<Frame> {
        let _guard = self.input_lock.lock();
        let issued = self.issued.load(Ordering::Acquire);
        if issued >= self.controls.num_frames() && !self.controls.duration_pending() {
            return None;
        }

        // The ring can only be momentarily empty when tokens == capacity
        // and recycling races the claim; spin briefly.
        let mut frame = loop {
            match self.ring.get() {
                Some(frame) => break frame,
                None => std::thread::yield_now(),
            }
        };

        let frame_no = issued as u64 + 1;
        self.issued.store(issued + 1, Ordering::Release);
        frame.frame_no = frame_no;
        tracing::trace!(frame = frame_no, "frame_start");

        if self.controls.coupling().decides_at_entry() {
            let device = path_selector::select_entry(self);
            frame.gpu_frame = device == DeviceKind::Gpu;
            frame.entry_device = Some(device);
        }
        Some(frame)
    }

    /// Frames issued so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::Acquire)
    }

    /// Frames fully completed (recycled).
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }

    /// Records one completed frame and wakes drain waiters.
    pub fn mark_frame_completed(&self) {
        let mut completed = self.completed.lock();
        *completed += 1;
        self.drained.notify_all();
    }

    /// Blocks until every issued frame has completed.
    pub fn wait_for_drain(&self) {
        let target = self.issued();
        let mut completed = self.completed.lock();
        while *completed < target {
            self.drained.wait(&mut completed);
        }
    }

    /// Records a fatal kernel failure; first error wins.
    pub fn record_failure(&self, error: PipelineError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            tracing::error!(error = %error, "pipeline failure recorded");
            *slot = Some(error);
        }
        // Stop issuing new frames.
        self.controls.freeze_budget(self.issued());
    }

    /// The recorded failure, if any.
    pub fn failure(&self) -> Option<PipelineError> {
        self.failure.lock().clone()
    }

    /// Convenience: the acquisition mode of this run.
    pub fn acquisition(&self) -> AcquisitionMode {
        self.settings.acquisition
    }

    /// Keeps a timer alive for the rest of the run.
    pub fn adopt_timer(&self, timer: CancellableTimer) {
        self.timers.lock().push(timer);
    }

    /// Cancels and drops all adopted timers.
    pub fn cancel_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in timers {
            timer.cancel();
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("engine", &self.settings.engine)
            .field("issued", &self.issued())
            .field("completed", &self.completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancellable_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = CancellableTimer::schedule("t", Duration::from_millis(10), move || {
            flag.store(true, Ordering::Release);
        });
        std::thread::sleep(Duration::from_millis(50));
        timer.cancel();
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn test_cancellable_timer_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = CancellableTimer::schedule("t", Duration::from_secs(30), move || {
            flag.store(true, Ordering::Release);
        });
        timer.cancel();
        assert!(!fired.load(Ordering::Acquire));
    }

    #[test]
    fn test_controls_budget_freeze() {
        let controls = RunControls {
            num_frames: AtomicUsize::new(usize::MAX),
            duration_pending: AtomicBool::new(true),
            sampling_pending: AtomicBool::new(false),
            tokens: AtomicUsize::new(4),
            auto_mode: AtomicBool::new(false),
            coupling: RwLock::new(CouplingMode::Coupled),
            policies: RwLock::new(vec![StagePolicy::CpuOnly]),
            priorities: RwLock::new(vec![DeviceKind::Cpu]),
            config_label: Mutex::new("000".to_string()),
            sample_frames: AtomicUsize::new(0),
        };

        assert!(controls.duration_pending());
        controls.freeze_budget(42);
        assert_eq!(controls.num_frames(), 42);
        assert!(!controls.duration_pending());
    }

    #[test]
    fn test_auto_disarm_is_one_shot() {
        let controls = RunControls {
            num_frames: AtomicUsize::new(10),
            duration_pending: AtomicBool::new(false),
            sampling_pending: AtomicBool::new(false),
            tokens: AtomicUsize::new(4),
            auto_mode: AtomicBool::new(true),
            coupling: RwLock::new(CouplingMode::Coupled),
            policies: RwLock::new(vec![StagePolicy::CpuOrGpu]),
            priorities: RwLock::new(vec![DeviceKind::Gpu]),
            config_label: Mutex::new("AUTO".to_string()),
            sample_frames: AtomicUsize::new(0),
        };

        assert!(controls.disarm_auto());
        assert!(!controls.disarm_auto());
        assert!(!controls.auto_mode());
    }
}
