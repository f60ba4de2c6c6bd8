// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event-Chained Engine
//!
//! No worker graph: up to `tokens` per-frame pipelines run cooperatively,
//! one thread each. A pipeline claims a frame, submits every stage to the
//! device queues with the frame's prior completion handles as
//! dependencies, waits for the chain to settle, and completes the frame.
//!
//! Admission is acquired at submission time and returned by a dependent
//! work item the moment the kernel completes, so a core is held exactly
//! for the queued-plus-executing span of its kernel. A global in-flight
//! limiter (sized to the worker cores plus the GPU) bounds how many
//! pipelines do host-side work at once.
//!
//! The metric aggregator is fed from completion-handle profiling info
//! (`command_end - command_start`) rather than wall clocks.

use std::sync::Arc;

use crate::application::context::RunContext;
use crate::application::dispatcher;
use crate::application::engines::{OutputStage, TimingFold, TokenBucket};
use crate::application::path_selector;

pub fn run(ctx: &Arc<RunContext>) {
    let pipelines = ctx.controls.tokens();
    let limiter = TokenBucket::new(ctx.settings.threads + usize::from(ctx.settings.gpu_active));
    let output = OutputStage::new();

    std::thread::scope(|scope| {
        for index in 0..pipelines {
            let limiter = &limiter;
            let output = &output;
            std::thread::Builder::new()
                .name(format!("frame-pipeline-{}", index))
                .spawn_scoped(scope, move || frame_loop(ctx, limiter, output))
                .expect("failed to spawn frame pipeline");
        }
    });
}

fn frame_loop(ctx: &Arc<RunContext>, limiter: &TokenBucket, output: &OutputStage) {
    let num_stages = ctx.settings.num_stages;
    loop {
        limiter.acquire();
        let frame = ctx.next_frame();
        limiter.release();
        let Some(mut frame) = frame else { break };

        for stage in 0..num_stages {
            limiter.acquire();
            let pick = path_selector::select_for_stage(ctx, stage, &frame);
            dispatcher::dispatch_event(ctx, stage, pick.device, &mut frame, pick.admitted);
            limiter.release();
        }

        // The chain settles back to front, but waiting each handle keeps
        // failure attribution per stage.
        for handle in frame.handles.clone() {
            if let Err(error) = handle.wait() {
                ctx.record_failure(error);
            }
        }

        limiter.acquire();
        output.complete(ctx, frame, TimingFold::HandleProfiles);
        limiter.release();
    }
}
