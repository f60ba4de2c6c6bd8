// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Split/Join Graph Engine
//!
//! Token-buffer topology: the input node pairs each frame with a permit
//! from the token buffer (the join), a per-stage splitter routes the frame
//! to the CPU or GPU branch, an indexer rejoins the branches into the next
//! splitter, and the output node returns the permit and recycles the
//! frame.
//!
//! Two GPU flavours share the topology:
//!
//! - **Functional** - the GPU branch runs on the worker that took the
//!   frame, as a submit-and-wait against the device queue; simple, but a
//!   worker thread idles while the device executes.
//! - **Async** - the GPU branch is an asynchronous node: kernel,
//!   bookkeeping, release, and re-injection all run on the device
//!   executor, and the worker moves on immediately.
//!
//! When the auto-tuner commits a larger token count, the extra permits
//! are added to the token buffer on the spot.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

use hybrid_pipeline_domain::entities::Frame;
use hybrid_pipeline_domain::value_objects::DeviceKind;

use crate::application::context::RunContext;
use crate::application::dispatcher;
use crate::application::engines::{OutputStage, TimingFold, TokenBucket};
use crate::application::path_selector;

/// GPU branch execution flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMode {
    Functional,
    Async,
}

enum Message {
    Work { frame: Frame, stage: usize },
    Stop,
}

pub fn run(ctx: &Arc<RunContext>, mode: GpuMode) {
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
                .name(format!("graph-worker-{}", index))
                .spawn_scoped(scope, move || worker_loop(ctx, mode, &rx, &tx, bucket, output))
                .expect("failed to spawn graph worker");
        }

        // Input node joined with the token buffer.
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
    mode: GpuMode,
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
                    // Splitter: route to the CPU or GPU branch.
                    let pick = path_selector::select_for_stage(ctx, stage, &frame);
                    if pick.device == DeviceKind::Gpu && mode == GpuMode::Async {
                        let next = tx.clone();
                        dispatcher::dispatch_async_gpu(ctx, stage, frame, pick.admitted, move |frame| {
                            let _ = next.send(Message::Work { frame, stage: stage + 1 });
                        });
                    } else {
                        dispatcher::dispatch_blocking(ctx, stage, pick.device, &mut frame);
                        path_selector::release_pick(ctx, stage, pick);
                        let _ = tx.send(Message::Work { frame, stage: stage + 1 });
                    }
                } else {
                    // Output node: permit back to the token buffer.
                    if let Some(change) = output.complete(ctx, frame, TimingFold::FrameLocal) {
                        if change.committed > change.previous {
                            bucket.add(change.committed - change.previous);
                            tracing::debug!(
                                extra = change.committed - change.previous,
                                "token buffer grown after reconfiguration"
                            );
                        }
                    }
                    bucket.release();
                }
            }
        }
    }
}
