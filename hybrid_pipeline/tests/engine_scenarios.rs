// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end engine scenarios: baselines, adaptive dispatch, decoupled
//! runs, event chaining, and termination across every topology. Workload
//! kernels with sub-millisecond service times keep each scenario fast.

mod common;

use hybrid_pipeline::application::{engines, results};
use hybrid_pipeline_domain::value_objects::DeviceKind;

#[test]
fn test_serial_cpu_baseline() {
    let ctx = common::build_context(&[
        "--api", "serial", "--config", "000", "--numframes", "10", "--threads", "1", "--thcpu", "2000", "--thgpu",
        "2000",
    ]);
    engines::execute(&ctx).unwrap();

    for stage in 0..3 {
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Cpu), 10);
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Gpu), 0);
        assert!(ctx.metrics.time_ms(stage, DeviceKind::Cpu) > 0.0);
    }
    assert_eq!(ctx.completed(), 10);

    let summary = results::summarize(&ctx);
    assert!(summary.throughput_fps > 0.0);
    assert!(summary.total_time_ms > 0.0);
}

#[test]
fn test_serial_with_event_chaining() {
    let ctx = common::build_context(&[
        "--api", "serial", "--config", "000", "--dependson", "--numframes", "8", "--threads", "1", "--thcpu",
        "2000", "--thgpu", "2000",
    ]);
    engines::execute(&ctx).unwrap();

    assert_eq!(ctx.completed(), 8);
    for stage in 0..3 {
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Cpu), 8);
        // Chained stages report profiled time through their handles.
        assert!(ctx.metrics.time_ms(stage, DeviceKind::Cpu) > 0.0);
    }
}

#[test]
fn test_gpu_only_event_chain() {
    let ctx = common::build_context(&[
        "--api", "event_chain", "--config", "222", "--iff", "4", "--numframes", "60", "--threads", "2", "--thcpu",
        "2000", "--thgpu", "2000",
    ]);
    engines::execute(&ctx).unwrap();

    for stage in 0..3 {
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Gpu), 60);
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Cpu), 0);
        assert!(ctx.metrics.time_ms(stage, DeviceKind::Gpu) > 0.0);
    }
    assert_eq!(ctx.completed(), 60);
    // Conservation: every admission was released.
    assert!(ctx.manager.idle());
}

#[test]
fn test_coupled_adaptive_uses_both_devices() {
    let ctx = common::build_context(&[
        "--api", "bounded_parallel", "--config", "111", "--iff", "4", "--numframes", "200", "--threads", "2",
        "--thcpu", "1000", "--thgpu", "1000",
    ]);
    engines::execute(&ctx).unwrap();

    for stage in 0..3 {
        let cpu = ctx.metrics.frames(stage, DeviceKind::Cpu);
        let gpu = ctx.metrics.frames(stage, DeviceKind::Gpu);
        assert_eq!(cpu + gpu, 200, "stage {} lost frames", stage);
        assert!(cpu > 0, "stage {} never ran on the CPU", stage);
        assert!(gpu > 0, "stage {} never ran on the GPU", stage);
    }
    assert_eq!(ctx.completed(), 200);
    assert!(ctx.manager.idle());
}

#[test]
fn test_decoupled_frames_stay_on_one_device() {
    let ctx = common::build_context(&[
        "--api", "graph_functional", "--config", "DECOUPLED", "--numframes", "100", "--threads", "2", "--thcpu",
        "1000", "--thgpu", "1000",
    ]);
    engines::execute(&ctx).unwrap();

    // Every frame is marked once at entry and accumulates all stages on
    // exactly one device, so per-device counts are identical across
    // stages.
    let cpu0 = ctx.metrics.frames(0, DeviceKind::Cpu);
    let gpu0 = ctx.metrics.frames(0, DeviceKind::Gpu);
    assert_eq!(cpu0 + gpu0, 100);
    for stage in 1..3 {
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Cpu), cpu0);
        assert_eq!(ctx.metrics.frames(stage, DeviceKind::Gpu), gpu0);
    }
    assert!(cpu0 > 0);
    assert!(gpu0 > 0);
    assert!(ctx.manager.idle());
}

#[test]
fn test_every_engine_terminates_on_frame_budget() {
    for api in [
        "serial",
        "bounded_parallel",
        "graph_functional",
        "graph_async",
        "event_chain",
        "scalable",
    ] {
        let ctx = common::build_context(&[
            "--api", api, "--config", "111", "--iff", "3", "--numframes", "25", "--threads", "2", "--thcpu",
            "1500", "--thgpu", "1500",
        ]);
        engines::execute(&ctx).unwrap();
        assert_eq!(ctx.completed(), 25, "engine {} did not drain", api);
        assert!(ctx.manager.idle(), "engine {} leaked admissions", api);

        let mut total = 0;
        for stage in 0..3 {
            total += ctx.metrics.frames(stage, DeviceKind::Cpu) + ctx.metrics.frames(stage, DeviceKind::Gpu);
        }
        assert_eq!(total, 25 * 3, "engine {} lost stage work", api);
    }
}

#[test]
fn test_duration_budget_terminates() {
    let ctx = common::build_context(&[
        "--api", "bounded_parallel", "--config", "000", "--duration", "1s", "--threads", "2", "--thcpu", "500",
        "--thgpu", "500",
    ]);
    engines::execute(&ctx).unwrap();

    // The timer froze the budget at the issued count; the pipeline
    // drained everything it admitted.
    assert!(ctx.completed() > 0);
    assert_eq!(ctx.completed(), ctx.issued());
    let summary = results::summarize(&ctx);
    assert!(summary.total_time_ms >= 1000.0);
}

#[test]
fn test_image_filter_pipeline_end_to_end() {
    // The real kernels, tiny frames: correctness of the default registry
    // wiring rather than throughput.
    let ctx = common::build_context(&["--api", "bounded_parallel", "--config", "111", "--numframes", "12", "--threads", "2"]);
    engines::execute(&ctx).unwrap();

    assert_eq!(ctx.completed(), 12);
    for stage in 0..3 {
        assert_eq!(
            ctx.metrics.frames(stage, DeviceKind::Cpu) + ctx.metrics.frames(stage, DeviceKind::Gpu),
            12
        );
    }
}

#[test]
fn test_report_record_shape() {
    let ctx = common::build_context(&[
        "--api", "scalable", "--config", "111", "--numframes", "20", "--threads", "2", "--thcpu", "1500",
        "--thgpu", "1500",
    ]);
    engines::execute(&ctx).unwrap();

    let summary = results::summarize(&ctx);
    let record = results::report_record(&ctx, &summary);
    assert_eq!(record.engine, "scalable");
    assert_eq!(record.num_frames, 20);
    assert_eq!(record.frames_cpu.len(), 3);
    assert_eq!(record.frames_gpu.len(), 3);
    assert_eq!(
        record.frames_cpu.iter().sum::<u64>() + record.frames_gpu.iter().sum::<u64>(),
        60
    );
}
