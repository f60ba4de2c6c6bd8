// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Path Selector
//!
//! Chooses the device for a frame's stage and tracks the admission grant
//! that comes with the choice.
//!
//! - **Coupled / coupled-custom**: the selector consults the resources
//!   manager at every stage; the returned pick carries `admitted = true`
//!   and owes exactly one release.
//! - **Decoupled**: one consultation at pipeline entry (before stage 0);
//!   the decision and its grant are recorded on the frame, every stage
//!   replays the device without touching admission (`admitted = false`),
//!   and the output stage releases the entry grant.
//!
//! Release decisions follow the pick, never the *current* coupling mode:
//! the auto-tuner may flip the mode while frames are in flight, and a
//! release must match what was actually acquired.
//!
//! Admission failure is never surfaced: the selector retries in a
//! cooperative busy-wait loop (yielding between attempts) until a device
//! admits the frame. A condition variable would be the obvious
//! alternative, but yields survive the auto-tuner swapping units under the
//! retry loop, where a missed notify on a reconfigured unit could strand a
//! waiter. Only admission latency is observable from outside.

use std::sync::Arc;

use hybrid_pipeline_domain::entities::Frame;
use hybrid_pipeline_domain::value_objects::DeviceKind;

use crate::application::context::RunContext;

/// The outcome of path selection for one stage of one frame.
#[derive(Debug, Clone, Copy)]
pub struct StagePick {
    pub device: DeviceKind,
    /// Whether this pick holds a per-stage admission grant (and therefore
    /// owes one release).
    pub admitted: bool,
}

/// Picks the device for a stage: replays the frame's entry decision when
/// one was recorded, otherwise acquires through the resources manager,
/// blocking (cooperatively) until a device admits the work.
pub fn select_for_stage(ctx: &Arc<RunContext>, stage: usize, frame: &Frame) -> StagePick {
    if frame.entry_device.is_some() || ctx.controls.coupling().decides_at_entry() {
        let device = if frame.gpu_frame { DeviceKind::Gpu } else { DeviceKind::Cpu };
        return StagePick {
            device,
            admitted: false,
        };
    }
    StagePick {
        device: acquire_with_retry(ctx, stage),
        admitted: true,
    }
}

/// The decoupled entry decision: one acquisition against stage 0's policy
/// that binds the whole frame to the granted device. The matching release
/// happens at the output stage, through the frame's recorded grant.
pub fn select_entry(ctx: &Arc<RunContext>) -> DeviceKind {
    acquire_with_retry(ctx, 0)
}

fn acquire_with_retry(ctx: &Arc<RunContext>, stage: usize) -> DeviceKind {
    tracing::trace!(stage, "admission_wait_start");
    let mut attempts = 0u64;
    let grant = loop {
        // Re-read policy and priority each attempt; the auto-tuner may
        // swap them under the retry loop. A pinned stage ignores the
        // priority vector, which would otherwise point the retry at a
        // device with zero capacity.
        let policy = ctx.controls.policy(stage);
        let preferred = policy.pinned_device().unwrap_or_else(|| ctx.controls.priority(stage));
        if let Some(grant) = ctx
            .manager
            .acquire_for_stage(stage, policy, preferred, ctx.acquisition())
        {
            break grant;
        }
        attempts += 1;
        std::thread::yield_now();
    };
    tracing::trace!(stage, device = %grant.device, attempts, "admission_wait_end");
    grant.device
}

/// Releases a stage pick's admission, if it holds one.
pub fn release_pick(ctx: &Arc<RunContext>, stage: usize, pick: StagePick) {
    if pick.admitted {
        ctx.manager.release_for_stage(stage, pick.device);
    }
}

/// Releases the frame's entry grant, if it carries one.
pub fn release_entry(ctx: &Arc<RunContext>, frame: &Frame) {
    if let Some(device) = frame.entry_device {
        ctx.manager.release_for_stage(0, device);
    }
}
