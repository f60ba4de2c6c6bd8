// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Metrics
//!
//! Per-stage, per-device accumulators: how many frames each (stage, device)
//! pair processed and how much kernel time it spent. The auto-tuner samples
//! these to estimate service rates, and the end-of-run summary folds them
//! into mean stage times.
//!
//! ## Thread Safety
//!
//! Counters are plain atomics. Time sums are `f64` values stored as bit
//! patterns in `AtomicU64` and updated with a compare-exchange loop; only
//! atomicity matters here, not ordering, so all accesses are `Relaxed`.
//! Update paths differ by engine: non-event engines fold frame-local
//! timings in the output node, the event engine feeds completion-handle
//! profiling directly.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::value_objects::DeviceKind;

/// Adds a delta to an `f64` stored as bits in an `AtomicU64`.
fn fetch_add_f64(cell: &AtomicU64, delta: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

/// Thread-safe per-stage, per-device accumulators.
#[derive(Debug)]
pub struct StageMetrics {
    num_stages: usize,
    frames_cpu: Vec<AtomicU64>,
    frames_gpu: Vec<AtomicU64>,
    time_cpu_ms: Vec<AtomicU64>,
    time_gpu_ms: Vec<AtomicU64>,
}

impl StageMetrics {
    /// Creates zeroed accumulators for `num_stages` stages.
    pub fn new(num_stages: usize) -> Self {
        let zeroed = |_: usize| AtomicU64::new(0);
        Self {
            num_stages,
            frames_cpu: (0..num_stages).map(zeroed).collect(),
            frames_gpu: (0..num_stages).map(zeroed).collect(),
            time_cpu_ms: (0..num_stages).map(zeroed).collect(),
            time_gpu_ms: (0..num_stages).map(zeroed).collect(),
        }
    }

    /// Number of stages being tracked.
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    /// Counts one frame processed by (stage, device).
    pub fn record_frame(&self, stage: usize, kind: DeviceKind) {
        match kind {
            DeviceKind::Cpu => &self.frames_cpu[stage],
            DeviceKind::Gpu => &self.frames_gpu[stage],
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates kernel time for (stage, device).
    pub fn add_time_ms(&self, stage: usize, kind: DeviceKind, elapsed_ms: f64) {
        match kind {
            DeviceKind::Cpu => fetch_add_f64(&self.time_cpu_ms[stage], elapsed_ms),
            DeviceKind::Gpu => fetch_add_f64(&self.time_gpu_ms[stage], elapsed_ms),
        }
    }

    /// Frames processed by (stage, device).
    pub fn frames(&self, stage: usize, kind: DeviceKind) -> u64 {
        match kind {
            DeviceKind::Cpu => &self.frames_cpu[stage],
            DeviceKind::Gpu => &self.frames_gpu[stage],
        }
        .load(Ordering::Relaxed)
    }

    /// Accumulated kernel milliseconds for (stage, device).
    pub fn time_ms(&self, stage: usize, kind: DeviceKind) -> f64 {
        match kind {
            DeviceKind::Cpu => load_f64(&self.time_cpu_ms[stage]),
            DeviceKind::Gpu => load_f64(&self.time_gpu_ms[stage]),
        }
    }

    /// Mean kernel time for (stage, device); zero when no frames were seen.
    pub fn mean_time_ms(&self, stage: usize, kind: DeviceKind) -> f64 {
        let frames = self.frames(stage, kind);
        if frames == 0 {
            0.0
        } else {
            self.time_ms(stage, kind) / frames as f64
        }
    }

    /// Total frames processed by one device across all stages.
    pub fn total_frames(&self, kind: DeviceKind) -> u64 {
        (0..self.num_stages).map(|stage| self.frames(stage, kind)).sum()
    }

    /// Total kernel time of one device across all stages.
    pub fn total_time_ms(&self, kind: DeviceKind) -> f64 {
        (0..self.num_stages).map(|stage| self.time_ms(stage, kind)).sum()
    }

    /// Whether every stage has accumulated time on both devices.
    ///
    /// This is the sampling-completeness condition the auto-tuner checks
    /// when no explicit sampling window is configured.
    pub fn all_stages_sampled(&self) -> bool {
        (0..self.num_stages)
            .all(|stage| self.time_ms(stage, DeviceKind::Cpu) > 0.0 && self.time_ms(stage, DeviceKind::Gpu) > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = StageMetrics::new(3);
        for stage in 0..3 {
            assert_eq!(metrics.frames(stage, DeviceKind::Cpu), 0);
            assert_eq!(metrics.frames(stage, DeviceKind::Gpu), 0);
            assert_eq!(metrics.time_ms(stage, DeviceKind::Cpu), 0.0);
        }
    }

    #[test]
    fn test_record_and_mean() {
        let metrics = StageMetrics::new(3);

        metrics.record_frame(1, DeviceKind::Gpu);
        metrics.record_frame(1, DeviceKind::Gpu);
        metrics.add_time_ms(1, DeviceKind::Gpu, 3.0);
        metrics.add_time_ms(1, DeviceKind::Gpu, 5.0);

        assert_eq!(metrics.frames(1, DeviceKind::Gpu), 2);
        assert_eq!(metrics.time_ms(1, DeviceKind::Gpu), 8.0);
        assert_eq!(metrics.mean_time_ms(1, DeviceKind::Gpu), 4.0);
        // Other device untouched
        assert_eq!(metrics.frames(1, DeviceKind::Cpu), 0);
        assert_eq!(metrics.mean_time_ms(1, DeviceKind::Cpu), 0.0);
    }

    #[test]
    fn test_totals_span_stages() {
        let metrics = StageMetrics::new(2);
        metrics.record_frame(0, DeviceKind::Cpu);
        metrics.record_frame(1, DeviceKind::Cpu);
        metrics.add_time_ms(0, DeviceKind::Cpu, 1.0);
        metrics.add_time_ms(1, DeviceKind::Cpu, 2.0);

        assert_eq!(metrics.total_frames(DeviceKind::Cpu), 2);
        assert_eq!(metrics.total_time_ms(DeviceKind::Cpu), 3.0);
    }

    #[test]
    fn test_sampling_completeness() {
        let metrics = StageMetrics::new(2);
        assert!(!metrics.all_stages_sampled());

        for stage in 0..2 {
            metrics.add_time_ms(stage, DeviceKind::Cpu, 1.0);
        }
        assert!(!metrics.all_stages_sampled());

        for stage in 0..2 {
            metrics.add_time_ms(stage, DeviceKind::Gpu, 1.0);
        }
        assert!(metrics.all_stages_sampled());
    }

    #[test]
    fn test_concurrent_time_accumulation() {
        use std::sync::Arc;
        let metrics = Arc::new(StageMetrics::new(1));
        let mut joins = Vec::new();

        for _ in 0..8 {
            let metrics = Arc::clone(&metrics);
            joins.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.add_time_ms(0, DeviceKind::Cpu, 0.5);
                }
            }));
        }
        for join in joins {
            join.join().unwrap();
        }

        assert!((metrics.time_ms(0, DeviceKind::Cpu) - 4000.0).abs() < 1e-6);
    }
}
