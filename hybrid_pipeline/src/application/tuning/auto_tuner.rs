// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Auto-Tuner
//!
//! One-shot hot reconfiguration of a live pipeline. Once the sampling
//! phase has measured every stage on both devices, the tuner:
//!
//! 1. turns the sampled mean service times into per-stage rates
//!    (`μC[i] = 1e3·cores / t̄C[i]`, `μG[i] = 1e3 / t̄G[i]`),
//! 2. asks the configuration planner for the throughput-ranked
//!    configurations,
//! 3. waits for the zero-in-flight barrier (no device core held),
//! 4. resizes the primary stage units, installs the helper stage and the
//!    virtual remap when the winner prescribes a split (or collapses the
//!    remap to the shared unit otherwise),
//! 5. commits policies, device priorities, coupling mode, and the token
//!    count, and starts the duration countdown if one was requested.
//!
//! Core-limited dimensioning keeps `cores + queue` of every stage equal to
//! its path population, so the token budget covers back-pressure
//! (`stage_cores + queue_size ≤ tokens` holds after reconfiguration).
//!
//! The caller disarms the auto-mode latch before invoking this, so the
//! tuner runs at most once per run; later sampling events are no-ops.

use std::sync::Arc;
use std::time::Duration;

use hybrid_pipeline_domain::services::configuration_planner::{
    plan_configurations, PlannedConfiguration, SecondaryPath,
};
use hybrid_pipeline_domain::value_objects::{CouplingMode, DeviceKind, StagePolicy};

use crate::application::context::{CancellableTimer, RunContext, TuningReport};
use crate::infrastructure::runtime::ResourceManager;

/// Polling backoff bounds for the zero-in-flight barrier.
const IDLE_BACKOFF_START: Duration = Duration::from_millis(1);
const IDLE_BACKOFF_CAP: Duration = Duration::from_millis(100);

/// Samples the metrics, plans, and reconfigures. Called from the output
/// stage with the auto-mode latch already taken.
pub fn optimize(ctx: &Arc<RunContext>) {
    let num_stages = ctx.settings.num_stages;
    let threads = ctx.settings.threads;

    let mut th_cpu = Vec::with_capacity(num_stages);
    let mut th_gpu = Vec::with_capacity(num_stages);
    for stage in 0..num_stages {
        let mean_cpu = ctx.metrics.mean_time_ms(stage, DeviceKind::Cpu);
        let mean_gpu = ctx.metrics.mean_time_ms(stage, DeviceKind::Gpu);
        if mean_cpu <= 0.0 || mean_gpu <= 0.0 {
            tracing::warn!(stage, "sampling incomplete, skipping reconfiguration");
            return;
        }
        th_cpu.push(1e3 * threads as f64 / mean_cpu);
        th_gpu.push(1e3 / mean_gpu);
    }
    tracing::info!(?th_cpu, ?th_gpu, "sampled stage rates (frames/s)");

    let plans = match plan_configurations(num_stages, &th_cpu, &th_gpu, threads) {
        Ok(plans) if !plans.is_empty() => plans,
        Ok(_) => {
            tracing::warn!("planner produced no feasible configuration");
            return;
        }
        Err(error) => {
            tracing::warn!(error = %error, "planner rejected sampled rates");
            return;
        }
    };

    for (rank, plan) in plans.iter().enumerate() {
        tracing::info!(
            rank = rank + 1,
            config = %plan.primary_config,
            secondary = ?plan.secondary,
            lambda = plan.lambda_effective,
            tokens = plan.tokens,
            "planned configuration"
        );
    }
    let best = &plans[0];

    wait_for_idle(&ctx.manager);
    apply_topology(ctx, best);
    commit_controls(ctx, best);

    // With a wall-clock budget, the countdown covers the reconfigured
    // system, not the sampling phase.
    if let Some(duration) = ctx.settings.duration {
        let weak = Arc::downgrade(ctx);
        ctx.adopt_timer(CancellableTimer::schedule("budget-timer", duration, move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.controls.freeze_budget(ctx.issued());
            }
        }));
    }

    ctx.clock.mark_system_start();
}

/// Polls with exponential backoff until no device core is held.
fn wait_for_idle(manager: &Arc<ResourceManager>) {
    let mut backoff = IDLE_BACKOFF_START;
    while !manager.idle() {
        tracing::debug!("waiting for in-flight work to drain before reconfiguration");
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(IDLE_BACKOFF_CAP);
    }
}

/// Resizes the primary units, installs the helper stage, and rewrites the
/// virtual remap tables.
fn apply_topology(ctx: &Arc<RunContext>, best: &PlannedConfiguration) {
    let num_stages = ctx.settings.num_stages;
    let Some(cpu) = ctx.manager.device(DeviceKind::Cpu).cloned() else { return };
    let Some(gpu) = ctx.manager.device(DeviceKind::Gpu).cloned() else { return };

    // Primary units: population splits into servers plus queue slots.
    if let Some(unit) = cpu.stage(0) {
        unit.set_total_cores(best.primary_cpu_cores);
        unit.set_max_queue(best.ncp.saturating_sub(best.primary_cpu_cores));
    }
    if let Some(unit) = gpu.stage(0) {
        unit.set_total_cores(1);
        unit.set_max_queue(best.ngp.saturating_sub(1));
    }

    match best.secondary {
        SecondaryPath::Gpu => {
            gpu.add_stage(1, 1, best.ngs);
            for stage in 0..num_stages {
                let gpu_unit = if best.primary_device(stage) == DeviceKind::Gpu { 0 } else { 1 };
                let _ = gpu.map_stage(stage, gpu_unit);
                let _ = cpu.map_stage(stage, 0);
            }
        }
        SecondaryPath::Cpu if best.secondary_cpu_cores > 0 => {
            cpu.add_stage(
                1,
                best.secondary_cpu_cores,
                best.ncs.saturating_sub(best.secondary_cpu_cores),
            );
            for stage in 0..num_stages {
                let cpu_unit = if best.primary_device(stage) == DeviceKind::Cpu { 0 } else { 1 };
                let _ = cpu.map_stage(stage, cpu_unit);
                let _ = gpu.map_stage(stage, 0);
            }
        }
        // A degenerate CPU split (no cores left) commits no helper; both
        // devices collapse onto their primary unit.
        SecondaryPath::Cpu | SecondaryPath::None => {
            for stage in 0..num_stages {
                let _ = cpu.map_stage(stage, 0);
                let _ = gpu.map_stage(stage, 0);
            }
        }
    }

    tracing::info!(
        cpu_cores = best.primary_cpu_cores,
        cpu_queue = best.ncp.saturating_sub(best.primary_cpu_cores),
        gpu_queue = best.ngp.saturating_sub(1),
        secondary = ?best.secondary,
        "admission topology reconfigured"
    );
}

/// Commits the execution policy the winner prescribes.
fn commit_controls(ctx: &Arc<RunContext>, best: &PlannedConfiguration) {
    let num_stages = ctx.settings.num_stages;

    let (coupling, policies) = if best.is_all_gpu() {
        // Both full paths run in parallel: decouple and let the entry
        // decision split traffic.
        (CouplingMode::Decoupled, vec![StagePolicy::CpuOrGpu; num_stages])
    } else {
        let policies = (0..num_stages)
            .map(|stage| {
                let gpu_primary = best.primary_device(stage) == DeviceKind::Gpu;
                match best.secondary {
                    SecondaryPath::None => {
                        if gpu_primary {
                            StagePolicy::GpuOnly
                        } else {
                            StagePolicy::CpuOnly
                        }
                    }
                    SecondaryPath::Gpu => {
                        if gpu_primary {
                            StagePolicy::GpuOnly
                        } else {
                            StagePolicy::CpuOrGpu
                        }
                    }
                    SecondaryPath::Cpu => {
                        if gpu_primary {
                            StagePolicy::CpuOrGpu
                        } else {
                            StagePolicy::CpuOnly
                        }
                    }
                }
            })
            .collect();
        (CouplingMode::Coupled, policies)
    };

    let priorities = (0..num_stages).map(|stage| best.primary_device(stage)).collect();

    ctx.controls.set_coupling(coupling);
    ctx.controls.set_policies(policies);
    ctx.controls.set_priorities(priorities);
    ctx.controls.set_tokens(best.tokens.max(1));
    ctx.controls.set_config_label(format!("{}-A", best.primary_config));

    let sample_frames = ctx.issued();
    ctx.controls.set_sample_frames(sample_frames);
    let sample_time_ms = ctx.clock.sample_ms().unwrap_or(0.0);
    let balance = if sample_time_ms > 0.0 {
        sample_frames as f64 * 1e3 / sample_time_ms
    } else {
        0.0
    };

    *ctx.tuning.lock() = Some(TuningReport {
        config_label: ctx.controls.config_label(),
        sample_frames,
        sample_time_ms,
        throughput_balance_fps: balance,
        throughput_expected_fps: best.lambda_effective,
        tokens: best.tokens,
    });

    tracing::info!(
        config = %ctx.controls.config_label(),
        coupling = %ctx.controls.coupling(),
        tokens = best.tokens,
        sample_frames,
        expected_fps = best.lambda_effective,
        "configuration committed"
    );
}
