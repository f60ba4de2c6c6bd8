// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Serial Engine
//!
//! Single-thread baseline: frames run one at a time, all stages in order,
//! with no admission calls and no worker pool. Each stage runs on the
//! device its policy pins (adaptive stages fall back to the CPU). With
//! event chaining enabled, stages are submitted to the device queues with
//! handle dependencies instead, and the frame waits for its chain before
//! the next frame starts - the baseline for measuring dependency-driven
//! submission overhead.

use std::sync::Arc;

use hybrid_pipeline_domain::value_objects::{DeviceKind, StagePolicy};

use crate::application::context::RunContext;
use crate::application::dispatcher;
use crate::application::engines::{fold_timings, TimingFold};
use crate::application::path_selector;

pub fn run(ctx: &Arc<RunContext>) {
    let num_stages = ctx.settings.num_stages;
    let chain = ctx.settings.chain_serial_events;

    while let Some(mut frame) = ctx.next_frame() {
        if chain {
            for stage in 0..num_stages {
                let device = stage_device(ctx, stage);
                dispatcher::dispatch_event(ctx, stage, device, &mut frame, false);
            }
            for handle in frame.handles.clone() {
                if let Err(error) = handle.wait() {
                    ctx.record_failure(error);
                }
            }
            fold_timings(ctx, &frame, TimingFold::HandleProfiles);
        } else {
            for stage in 0..num_stages {
                let device = stage_device(ctx, stage);
                dispatcher::dispatch_blocking(ctx, stage, device, &mut frame);
            }
            fold_timings(ctx, &frame, TimingFold::FrameLocal);
        }

        // A decoupled run still makes its entry acquisition in the input
        // step; give it back before the frame leaves.
        path_selector::release_entry(ctx, &frame);
        tracing::trace!(frame = frame.frame_no, "frame_end");
        ctx.ring.recycle(frame);
        ctx.mark_frame_completed();
    }
}

fn stage_device(ctx: &Arc<RunContext>, stage: usize) -> DeviceKind {
    match ctx.controls.policy(stage) {
        StagePolicy::GpuOnly => DeviceKind::Gpu,
        StagePolicy::CpuOnly | StagePolicy::CpuOrGpu => DeviceKind::Cpu,
    }
}
