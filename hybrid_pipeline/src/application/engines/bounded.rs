// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bounded-Parallel Engine
//!
//! The classic pipeline shape: a serial in-order input filter, N parallel
//! stage filters, and a serial out-of-order output filter, with the number
//! of in-flight frames capped by the token count.
//!
//! Mechanically: one task channel feeds a fixed worker pool; a task is a
//! frame plus its next stage index. Workers pull a task, run the stage
//! (path selection → dispatch → release), and push the frame back with
//! the next stage index. The input loop runs on the caller's thread,
//! acquiring a token per frame; the output step returns it. When the
//! budget is exhausted the input waits for the pipeline to drain and then
//! stops the workers.
//!
//! The token cap cannot change mid-run in this topology, so when the
//! auto-tuner commits a new token count the previous value is restored
//! (the rest of the committed configuration stands).

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

use hybrid_pipeline_domain::entities::Frame;

use crate::application::context::RunContext;
use crate::application::dispatcher;
use crate::application::engines::{OutputStage, TimingFold, TokenBucket};
use crate::application::path_selector;

enum Message {
    Work { frame: Frame, stage: usize },
    Stop,
}

pub fn run(ctx: &Arc<RunContext>) {
    let workers = ctx.settings.threads + usize::from(ctx.settings.gpu_active);
    let bucket = TokenBucket::new(ctx.controls.tokens());
    let output = OutputStage::new();
    let (tx, rx) = unbounded::<Message>();

    std::thread::scope(|scope| {
        for index in 0..workers {
            let rx = rx.clone();
            let tx = tx.clone();
            let bucket = &bucket;
            let output = &output;
            std::thread::Builder::new()
                .name(format!("stage-worker-{}", index))
                .spawn_scoped(scope, move || worker_loop(ctx, &rx, &tx, bucket, output))
                .expect("failed to spawn stage worker");
        }

        // Serial in-order input filter.
        loop {
            bucket.acquire();
            match ctx.next_frame() {
                Some(frame) => {
                    let _ = tx.send(Message::Work { frame, stage: 0 });
                }
                None => {
                    bucket.release();
                    break;
                }
            }
        }

        ctx.wait_for_drain();
        for _ in 0..workers {
            let _ = tx.send(Message::Stop);
        }
    });
}

fn worker_loop(
    ctx: &Arc<RunContext>,
    rx: &Receiver<Message>,
    tx: &Sender<Message>,
    bucket: &TokenBucket,
    output: &OutputStage,
) {
    let num_stages = ctx.settings.num_stages;
    while let Ok(message) = rx.recv() {
        match message {
            Message::Stop => break,
            Message::Work { mut frame, stage } => {
                if stage < num_stages {
                    let pick = path_selector::select_for_stage(ctx, stage, &frame);
                    dispatcher::dispatch_blocking(ctx, stage, pick.device, &mut frame);
                    path_selector::release_pick(ctx, stage, pick);
                    let _ = tx.send(Message::Work { frame, stage: stage + 1 });
                } else {
                    if let Some(change) = output.complete(ctx, frame, TimingFold::FrameLocal) {
                        // This topology cannot grow its in-flight cap, so
                        // the committed token count is rolled back.
                        ctx.controls.set_tokens(change.previous);
                        tracing::debug!(tokens = change.previous, "token change deferred by engine");
                    }
                    bucket.release();
                }
            }
        }
    }
}
