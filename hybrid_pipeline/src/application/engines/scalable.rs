// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scalable Engine
//!
//! Same contract as the bounded-parallel engine, different scheduler: a
//! work-stealing deque pool instead of a shared channel. The input node
//! pushes tasks into a global injector; each worker prefers its own FIFO
//! deque (a frame's later stages tend to stay on the worker that ran the
//! earlier ones, which keeps its scratch planes cache-warm) and steals
//! from the injector or its peers when idle.

use crossbeam_deque::{Injector, Stealer, Worker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hybrid_pipeline_domain::entities::Frame;

use crate::application::context::RunContext;
use crate::application::dispatcher;
use crate::application::engines::{OutputStage, TimingFold, TokenBucket};
use crate::application::path_selector;

struct Task {
    frame: Frame,
    stage: usize,
}

fn find_task(local: &Worker<Task>, injector: &Injector<Task>, stealers: &[Stealer<Task>]) -> Option<Task> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            injector
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|stealer| stealer.steal()).collect())
        })
        .find(|steal| !steal.is_retry())
        .and_then(|steal| steal.success())
    })
}

pub fn run(ctx: &Arc<RunContext>) {
    let worker_count = ctx.settings.threads + usize::from(ctx.settings.gpu_active);
    let bucket = TokenBucket::new(ctx.controls.tokens());
    let output = OutputStage::new();
    let injector = Injector::<Task>::new();
    let stop = AtomicBool::new(false);

    let locals: Vec<Worker<Task>> = (0..worker_count).map(|_| Worker::new_fifo()).collect();
    let stealers: Vec<Stealer<Task>> = locals.iter().map(Worker::stealer).collect();

    std::thread::scope(|scope| {
        for (index, local) in locals.into_iter().enumerate() {
            let injector = &injector;
            let stealers = &stealers;
            let stop = &stop;
            let bucket = &bucket;
            let output = &output;
            std::thread::Builder::new()
                .name(format!("scalable-worker-{}", index))
                .spawn_scoped(scope, move || {
                    worker_loop(ctx, local, injector, stealers, stop, bucket, output)
                })
                .expect("failed to spawn scalable worker");
        }

        loop {
            bucket.acquire();
            match ctx.next_frame() {
                Some(frame) => injector.push(Task { frame, stage: 0 }),
                None => {
                    bucket.release();
                    break;
                }
            }
        }

        ctx.wait_for_drain();
        stop.store(true, Ordering::Release);
    });
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    ctx: &Arc<RunContext>,
    local: Worker<Task>,
    injector: &Injector<Task>,
    stealers: &[Stealer<Task>],
    stop: &AtomicBool,
    bucket: &TokenBucket,
    output: &OutputStage,
) {
    let num_stages = ctx.settings.num_stages;
    loop {
        match find_task(&local, injector, stealers) {
            Some(Task { mut frame, stage }) => {
                if stage < num_stages {
                    let pick = path_selector::select_for_stage(ctx, stage, &frame);
                    dispatcher::dispatch_blocking(ctx, stage, pick.device, &mut frame);
                    path_selector::release_pick(ctx, stage, pick);
                    local.push(Task { frame, stage: stage + 1 });
                } else {
                    if let Some(change) = output.complete(ctx, frame, TimingFold::FrameLocal) {
                        ctx.controls.set_tokens(change.previous);
                        tracing::debug!(tokens = change.previous, "token change deferred by engine");
                    }
                    bucket.release();
                }
            }
            None => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                std::thread::yield_now();
            }
        }
    }
}
