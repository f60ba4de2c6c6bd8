// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Summary
//!
//! End-of-run reporting: overall throughput, per-stage per-device mean
//! times and frame counts, and - when the auto-tuner fired - the split
//! into sampling-phase and reconfigured-system throughput. The summary is
//! logged and also assembled into the JSON report record.

use std::sync::Arc;

use hybrid_pipeline_domain::value_objects::DeviceKind;

use crate::application::context::RunContext;
use crate::infrastructure::export::{self, ReportRecord};

/// Computed figures of one finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_time_ms: f64,
    pub throughput_fps: f64,
    pub throughput_balance_fps: Option<f64>,
    pub throughput_system_fps: Option<f64>,
    pub throughput_expected_fps: Option<f64>,
    pub frames: usize,
}

/// Computes the summary and logs it.
pub fn summarize(ctx: &Arc<RunContext>) -> RunSummary {
    let frames = ctx.completed();
    let total_time_ms = ctx.clock.total_ms().unwrap_or(0.0);
    let throughput_fps = if total_time_ms > 0.0 {
        frames as f64 * 1e3 / total_time_ms
    } else {
        0.0
    };

    let tuning = ctx.tuning.lock().clone();
    let (balance, system, expected) = match &tuning {
        Some(report) => {
            let system_ms = ctx.clock.system_ms().unwrap_or(0.0);
            let system_frames = frames.saturating_sub(report.sample_frames);
            let system_fps = if system_ms > 0.0 {
                system_frames as f64 * 1e3 / system_ms
            } else {
                0.0
            };
            (
                Some(report.throughput_balance_fps),
                Some(system_fps),
                Some(report.throughput_expected_fps),
            )
        }
        None => (None, None, None),
    };

    for stage in 0..ctx.settings.num_stages {
        for kind in [DeviceKind::Gpu, DeviceKind::Cpu] {
            let count = ctx.metrics.frames(stage, kind);
            if count > 0 {
                tracing::info!(
                    stage = stage + 1,
                    device = %kind,
                    frames = count,
                    mean_ms = format!("{:.2}", ctx.metrics.mean_time_ms(stage, kind)),
                    "stage summary"
                );
            }
        }
    }

    tracing::info!(
        frames,
        total_ms = format!("{:.2}", total_time_ms),
        throughput_fps = format!("{:.2}", throughput_fps),
        "run summary"
    );
    if let (Some(balance), Some(system), Some(expected)) = (balance, system, expected) {
        tracing::info!(
            balance_fps = format!("{:.2}", balance),
            system_fps = format!("{:.2}", system),
            expected_fps = format!("{:.2}", expected),
            "auto-tune summary"
        );
    }

    RunSummary {
        total_time_ms,
        throughput_fps,
        throughput_balance_fps: balance,
        throughput_system_fps: system,
        throughput_expected_fps: expected,
        frames,
    }
}

/// Builds the persisted report record for this run.
pub fn report_record(ctx: &Arc<RunContext>, summary: &RunSummary) -> ReportRecord {
    let num_stages = ctx.settings.num_stages;
    ReportRecord {
        run_tag: export::run_tag(),
        timestamp: export::timestamp(),
        engine: ctx.settings.engine.name().to_string(),
        config: ctx.controls.config_label(),
        num_frames: summary.frames,
        threads: ctx.settings.threads,
        tokens: ctx.controls.tokens(),
        total_time_ms: summary.total_time_ms,
        throughput_fps: summary.throughput_fps,
        throughput_balance_fps: summary.throughput_balance_fps,
        throughput_system_fps: summary.throughput_system_fps,
        throughput_expected_fps: summary.throughput_expected_fps,
        frames_cpu: (0..num_stages).map(|s| ctx.metrics.frames(s, DeviceKind::Cpu)).collect(),
        frames_gpu: (0..num_stages).map(|s| ctx.metrics.frames(s, DeviceKind::Gpu)).collect(),
        time_cpu_ms: (0..num_stages).map(|s| ctx.metrics.time_ms(s, DeviceKind::Cpu)).collect(),
        time_gpu_ms: (0..num_stages).map(|s| ctx.metrics.time_ms(s, DeviceKind::Gpu)).collect(),
    }
}
