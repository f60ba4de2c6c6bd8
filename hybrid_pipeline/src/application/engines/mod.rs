// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Engines
//!
//! Six interchangeable topologies drive frames through the same stages,
//! dispatch layer, and output bookkeeping:
//!
//! | Engine | Shape |
//! |--------|-------|
//! | [`serial`] | single thread, no admission; baseline |
//! | [`bounded`] | in-order input, parallel stage filters, serial unordered output, token-capped |
//! | [`graph`] (functional) | split/join token graph; GPU work occupies the worker |
//! | [`graph`] (async) | same graph; GPU side is an async node on the device queue |
//! | [`events`] | per-frame cooperative pipelines chained by completion handles |
//! | [`scalable`] | bounded-parallel contract on a work-stealing scheduler |
//!
//! Every engine honours the same invariants: per stage exactly one admit
//! and one release; frames enter in id order; the output stage is serial
//! but unordered; termination happens when the frame budget is met or the
//! duration timer freezes it.

pub mod bounded;
pub mod events;
pub mod graph;
pub mod scalable;
pub mod serial;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use hybrid_pipeline_domain::entities::Frame;
use hybrid_pipeline_domain::value_objects::DeviceKind;
use hybrid_pipeline_domain::PipelineError;

use crate::application::context::{CancellableTimer, RunContext};
use crate::application::path_selector;
use crate::application::tuning::auto_tuner;

/// Engine selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Serial,
    BoundedParallel,
    GraphFunctional,
    GraphAsync,
    EventChain,
    Scalable,
}

impl EngineKind {
    /// Parses the CLI engine name.
    pub fn from_name(name: &str) -> Result<Self, PipelineError> {
        match name {
            "serial" => Ok(EngineKind::Serial),
            "bounded_parallel" => Ok(EngineKind::BoundedParallel),
            "graph_functional" => Ok(EngineKind::GraphFunctional),
            "graph_async" => Ok(EngineKind::GraphAsync),
            "event_chain" => Ok(EngineKind::EventChain),
            "scalable" => Ok(EngineKind::Scalable),
            other => Err(PipelineError::invalid_config(format!("unknown engine '{}'", other))),
        }
    }

    /// The CLI name.
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Serial => "serial",
            EngineKind::BoundedParallel => "bounded_parallel",
            EngineKind::GraphFunctional => "graph_functional",
            EngineKind::GraphAsync => "graph_async",
            EngineKind::EventChain => "event_chain",
            EngineKind::Scalable => "scalable",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Counting semaphore for in-flight frame permits.
///
/// The graph engines seed it with the token count and return permits at
/// the output node; [`TokenBucket::add`] lets the auto-tuner grow the
/// pool mid-run.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<usize>,
    available: Condvar,
}

impl TokenBucket {
    pub fn new(tokens: usize) -> Self {
        Self {
            state: Mutex::new(tokens),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available and takes it.
    pub fn acquire(&self) {
        let mut tokens = self.state.lock();
        while *tokens == 0 {
            self.available.wait(&mut tokens);
        }
        *tokens -= 1;
    }

    /// Returns one permit.
    pub fn release(&self) {
        let mut tokens = self.state.lock();
        *tokens += 1;
        drop(tokens);
        self.available.notify_one();
    }

    /// Grows the pool by `extra` permits.
    pub fn add(&self, extra: usize) {
        let mut tokens = self.state.lock();
        *tokens += extra;
        drop(tokens);
        self.available.notify_all();
    }

    /// Currently available permits.
    pub fn available(&self) -> usize {
        *self.state.lock()
    }
}

/// How the output stage folds a frame's timings into the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingFold {
    /// Fold the wall-clock timings the dispatcher recorded on the frame.
    FrameLocal,
    /// Prefer completion-handle profiling info, falling back to the
    /// frame-local values (event-chained engine).
    HandleProfiles,
}

/// Token budget change committed by the auto-tuner during an output step.
#[derive(Debug, Clone, Copy)]
pub struct TokenChange {
    pub previous: usize,
    pub committed: usize,
}

/// The serial-unordered output stage shared by all parallel engines.
///
/// Owns the output lock (a field, not a global): decoupled entry release,
/// metric folding, the auto-tune trigger, trace closure, and recycling all
/// happen under it, one frame at a time in completion order.
#[derive(Debug, Default)]
pub struct OutputStage {
    lock: Mutex<()>,
}

impl OutputStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes one frame. Returns the token change when this completion
    /// triggered the auto-tuner.
    pub fn complete(&self, ctx: &Arc<RunContext>, frame: Frame, fold: TimingFold) -> Option<TokenChange> {
        let _guard = self.lock.lock();

        path_selector::release_entry(ctx, &frame);
        fold_timings(ctx, &frame, fold);

        let mut change = None;
        if ctx.controls.auto_mode() && tune_ready(ctx) && ctx.controls.disarm_auto() {
            ctx.clock.mark_sample_end();
            let previous = ctx.controls.tokens();
            auto_tuner::optimize(ctx);
            change = Some(TokenChange {
                previous,
                committed: ctx.controls.tokens(),
            });
        }

        tracing::trace!(frame = frame.frame_no, "frame_end");
        ctx.ring.recycle(frame);
        ctx.mark_frame_completed();
        change
    }
}

/// Sampling-completeness condition for the auto-tuner: every stage has
/// accumulated time on both devices, and the sampling window (when one is
/// configured) has expired.
fn tune_ready(ctx: &Arc<RunContext>) -> bool {
    if !ctx.metrics.all_stages_sampled() {
        return false;
    }
    ctx.settings.sampling_window.is_none() || !ctx.controls.sampling_pending()
}

pub(crate) fn fold_timings(ctx: &Arc<RunContext>, frame: &Frame, fold: TimingFold) {
    match fold {
        TimingFold::FrameLocal => {
            for stage in 0..frame.num_stages() {
                if frame.gpu_ms[stage] > 0.0 {
                    ctx.metrics.add_time_ms(stage, DeviceKind::Gpu, frame.gpu_ms[stage]);
                }
                if frame.cpu_ms[stage] > 0.0 {
                    ctx.metrics.add_time_ms(stage, DeviceKind::Cpu, frame.cpu_ms[stage]);
                }
            }
        }
        TimingFold::HandleProfiles => {
            for (stage, (handle, device)) in frame.handles.iter().zip(&frame.devices).enumerate() {
                let elapsed_ms = handle
                    .profile()
                    .map(|profile| profile.execution_ms())
                    .unwrap_or_else(|| match device {
                        DeviceKind::Cpu => frame.cpu_ms[stage],
                        DeviceKind::Gpu => frame.gpu_ms[stage],
                    });
                if elapsed_ms > 0.0 {
                    ctx.metrics.add_time_ms(stage, *device, elapsed_ms);
                }
            }
        }
    }
}

/// Runs the configured engine to completion: clock, timers, engine body,
/// failure propagation.
pub fn execute(ctx: &Arc<RunContext>) -> Result<(), PipelineError> {
    let kind = ctx.settings.engine;
    tracing::info!(engine = %kind, frames = ctx.controls.num_frames(), tokens = ctx.controls.tokens(), "pipeline starting");

    // Occupancy monitor logs at debug level only; skip its thread
    // entirely when nobody would see the output.
    let monitor = if tracing::enabled!(tracing::Level::DEBUG) {
        Some(crate::infrastructure::runtime::spawn_monitor(
            Arc::clone(&ctx.manager),
            ctx.settings.num_stages,
        ))
    } else {
        None
    };

    ctx.clock.mark_start();

    if let Some(window) = ctx.settings.sampling_window {
        let weak = Arc::downgrade(ctx);
        ctx.adopt_timer(CancellableTimer::schedule("sampling-timer", window, move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.controls.expire_sampling();
            }
        }));
    }

    // In auto mode the duration countdown starts when the tuner commits,
    // so the measured window covers the reconfigured system only.
    if let (Some(duration), false) = (ctx.settings.duration, ctx.settings.auto_tune) {
        let weak = Arc::downgrade(ctx);
        ctx.adopt_timer(CancellableTimer::schedule("budget-timer", duration, move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.controls.freeze_budget(ctx.issued());
            }
        }));
    }

    match kind {
        EngineKind::Serial => serial::run(ctx),
        EngineKind::BoundedParallel => bounded::run(ctx),
        EngineKind::GraphFunctional => graph::run(ctx, graph::GpuMode::Functional),
        EngineKind::GraphAsync => graph::run(ctx, graph::GpuMode::Async),
        EngineKind::EventChain => events::run(ctx),
        EngineKind::Scalable => scalable::run(ctx),
    }

    ctx.clock.mark_end();
    ctx.cancel_timers();
    if let Some(monitor) = monitor {
        monitor.stop();
    }

    match ctx.failure() {
        Some(error) => Err(error),
        None => {
            tracing::info!(
                engine = %kind,
                frames = ctx.completed(),
                "pipeline finished"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names_round_trip() {
        for kind in [
            EngineKind::Serial,
            EngineKind::BoundedParallel,
            EngineKind::GraphFunctional,
            EngineKind::GraphAsync,
            EngineKind::EventChain,
            EngineKind::Scalable,
        ] {
            assert_eq!(EngineKind::from_name(kind.name()).unwrap(), kind);
        }
        assert!(EngineKind::from_name("tbb").is_err());
    }

    #[test]
    fn test_token_bucket_counts() {
        let bucket = TokenBucket::new(2);
        bucket.acquire();
        bucket.acquire();
        assert_eq!(bucket.available(), 0);
        bucket.release();
        assert_eq!(bucket.available(), 1);
        bucket.add(3);
        assert_eq!(bucket.available(), 4);
    }

    #[test]
    fn test_token_bucket_blocks_until_release() {
        let bucket = Arc::new(TokenBucket::new(1));
        bucket.acquire();

        let shared = Arc::clone(&bucket);
        let join = std::thread::spawn(move || {
            shared.acquire();
            shared.release();
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        bucket.release();
        join.join().unwrap();
    }
}
