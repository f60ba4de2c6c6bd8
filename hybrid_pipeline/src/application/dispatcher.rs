// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Dispatcher
//!
//! Wraps every stage-function call with the bookkeeping the engines share:
//! trace markers, wall-clock or profiled timing, per-frame and global
//! counter updates, and the admission release discipline.
//!
//! Three dispatch shapes cover the engine topologies:
//!
//! - [`dispatch_blocking`] - runs the kernel to completion on the calling
//!   thread (CPU inline; GPU as submit-and-wait on the device queue, the
//!   functional-node shape).
//! - [`dispatch_async_gpu`] - places kernel, bookkeeping, release, and a
//!   forwarding callback on the GPU queue as one item, so the calling
//!   worker thread is free the moment the submission is enqueued (the
//!   async-node shape).
//! - [`dispatch_event`] - submits the kernel with the frame's prior
//!   completion handles as dependencies and returns the new handle
//!   without waiting (the event-chained shape); in coupled mode the
//!   admission release is itself submitted as a dependent item so the
//!   core returns atomically with kernel completion.
//!
//! Kernel failures are recorded on the run context (freezing the frame
//! budget) rather than propagated, so frames keep flowing to the output
//! stage and the pipeline drains instead of leaking tokens.

use std::sync::Arc;
use std::time::Instant;

use hybrid_pipeline_domain::entities::{CompletionHandle, Frame};
use hybrid_pipeline_domain::value_objects::DeviceKind;

use crate::application::context::RunContext;

/// Runs one stage to completion on the calling thread and records its
/// timing on the frame. The caller still owes the admission release.
pub fn dispatch_blocking(ctx: &Arc<RunContext>, stage: usize, device: DeviceKind, frame: &mut Frame) {
    let kernel = Arc::clone(ctx.registry.kernel(stage, device));
    tracing::trace!(frame = frame.frame_no, stage, device = %device, kernel = kernel.name(), "stage_start");

    let handle = match device {
        DeviceKind::Cpu => {
            let started = Instant::now();
            if let Err(error) = kernel.run(frame.buffers(), &ctx.inputs) {
                ctx.record_failure(error);
            }
            CompletionHandle::completed_between(started, Instant::now())
        }
        DeviceKind::Gpu => {
            let buffers = Arc::clone(frame.buffers());
            let inputs = ctx.inputs.clone();
            let handle = ctx
                .queues
                .queue(DeviceKind::Gpu)
                .submit(&[], move || kernel.run(&buffers, &inputs));
            if let Err(error) = handle.wait() {
                ctx.record_failure(error);
            }
            handle
        }
    };

    let elapsed_ms = handle.profile().map(|profile| profile.execution_ms()).unwrap_or(0.0);
    frame.record_time(stage, device, elapsed_ms);
    frame.record_stage(device, handle);
    ctx.metrics.record_frame(stage, device);
    tracing::trace!(frame = frame.frame_no, stage, device = %device, elapsed_ms, "stage_end");
}

/// Submits one GPU stage asynchronously. The frame moves into the work
/// item; once the kernel finishes, the item records timing, releases the
/// stage admission (when `admitted`), and hands the frame to `on_done` -
/// all on the device executor, so no pipeline worker blocks on the
/// kernel.
pub fn dispatch_async_gpu(
    ctx: &Arc<RunContext>,
    stage: usize,
    mut frame: Frame,
    admitted: bool,
    on_done: impl FnOnce(Frame) + Send + 'static,
) {
    let kernel = Arc::clone(ctx.registry.kernel(stage, DeviceKind::Gpu));
    let queue = Arc::clone(ctx.queues.queue(DeviceKind::Gpu));
    let ctx = Arc::clone(ctx);
    tracing::trace!(frame = frame.frame_no, stage, device = "GPU", kernel = kernel.name(), "stage_start");

    queue.submit(&[], move || {
        let buffers = Arc::clone(frame.buffers());
        let started = Instant::now();
        let outcome = kernel.run(&buffers, &ctx.inputs);
        let finished = Instant::now();
        if let Err(error) = outcome {
            ctx.record_failure(error);
        }

        let elapsed_ms = finished.duration_since(started).as_secs_f64() * 1e3;
        frame.record_time(stage, DeviceKind::Gpu, elapsed_ms);
        frame.record_stage(DeviceKind::Gpu, CompletionHandle::completed_between(started, finished));
        ctx.metrics.record_frame(stage, DeviceKind::Gpu);
        if admitted {
            ctx.manager.release_for_stage(stage, DeviceKind::Gpu);
        }
        tracing::trace!(frame = frame.frame_no, stage, device = "GPU", elapsed_ms, "stage_end");

        on_done(frame);
        Ok(())
    });
}

/// Submits one stage with the frame's prior handles as dependencies and
/// returns the new handle without waiting. Stage timing is taken from the
/// handle's profiling info at the output stage.
///
/// `release_admission` says whether the caller holds a per-stage admission
/// grant to give back (the serial baseline submits without admission; a
/// decoupled run releases only its entry grant, at the output stage).
pub fn dispatch_event(
    ctx: &Arc<RunContext>,
    stage: usize,
    device: DeviceKind,
    frame: &mut Frame,
    release_admission: bool,
) -> CompletionHandle {
    let kernel = Arc::clone(ctx.registry.kernel(stage, device));
    let queue = Arc::clone(ctx.queues.queue(device));
    let buffers = Arc::clone(frame.buffers());
    let inputs = ctx.inputs.clone();
    tracing::trace!(frame = frame.frame_no, stage, device = %device, kernel = kernel.name(), "stage_submit");

    let handle = queue.submit(&frame.handles, move || kernel.run(&buffers, &inputs));
    frame.record_stage(device, handle.clone());
    ctx.metrics.record_frame(stage, device);

    // Coupled runs return the core the moment the kernel completes, by
    // chaining the release behind the handle on the same queue.
    if release_admission {
        let manager = Arc::clone(&ctx.manager);
        queue.submit(&[handle.clone()], move || {
            manager.release_for_stage(stage, device);
            Ok(())
        });
    }

    handle
}
