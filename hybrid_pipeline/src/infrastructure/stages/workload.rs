// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Workload Simulation Kernel
//!
//! Synthetic stage function that models a kernel of known throughput by
//! busy-waiting (with cooperative yields) for one service interval. Used
//! when the operator supplies `--thcpu`/`--thgpu` rates and throughout the
//! test suite, where real filters would make timing-sensitive scenarios
//! slow and noisy.
//!
//! The interval is `num_threads / throughput` seconds - the per-core
//! service time when `throughput` frames/s are delivered by `num_threads`
//! cooperating cores - stretched by a bounded random variation so
//! simulated stages do not beat in lockstep.

use rand::Rng;
use std::time::{Duration, Instant};

use hybrid_pipeline_domain::entities::FrameBuffers;
use hybrid_pipeline_domain::PipelineError;

use crate::infrastructure::stages::registry::StageKernel;
use crate::infrastructure::stages::SharedInputs;

/// Busy-wait kernel with a configured service rate.
#[derive(Debug, Clone)]
pub struct WorkloadKernel {
    name: String,
    interval: Duration,
    variation_percent: f64,
}

impl WorkloadKernel {
    /// Creates a kernel delivering `throughput` frames/s across
    /// `num_threads` cores, with the default 10% interval variation.
    pub fn new(name: impl Into<String>, throughput: f64, num_threads: usize) -> Result<Self, PipelineError> {
        Self::with_variation(name, throughput, num_threads, 10.0)
    }

    /// Creates a kernel with an explicit variation percentage.
    pub fn with_variation(
        name: impl Into<String>,
        throughput: f64,
        num_threads: usize,
        variation_percent: f64,
    ) -> Result<Self, PipelineError> {
        if !throughput.is_finite() || throughput <= 0.0 {
            return Err(PipelineError::invalid_config("workload throughput must be positive"));
        }
        if num_threads == 0 {
            return Err(PipelineError::invalid_config("workload thread count must be positive"));
        }
        if variation_percent < 0.0 {
            return Err(PipelineError::invalid_config("workload variation must be non-negative"));
        }
        let per_core_rate = throughput / num_threads as f64;
        Ok(Self {
            name: name.into(),
            interval: Duration::from_secs_f64(1.0 / per_core_rate),
            variation_percent,
        })
    }

    /// The base service interval for one core.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl StageKernel for WorkloadKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _buffers: &FrameBuffers, _inputs: &SharedInputs) -> Result<(), PipelineError> {
        let stretch = if self.variation_percent > 0.0 {
            1.0 + rand::rng().random_range(0.0..self.variation_percent / 100.0)
        } else {
            1.0
        };
        let target = self.interval.mul_f64(stretch);
        let start = Instant::now();
        while start.elapsed() < target {
            std::thread::yield_now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_pipeline_domain::value_objects::ImageGeometry;

    #[test]
    fn test_interval_scales_with_threads() {
        let solo = WorkloadKernel::new("s", 100.0, 1).unwrap();
        let quad = WorkloadKernel::new("q", 100.0, 4).unwrap();
        assert_eq!(solo.interval(), Duration::from_millis(10));
        assert_eq!(quad.interval(), Duration::from_millis(40));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(WorkloadKernel::new("k", 0.0, 1).is_err());
        assert!(WorkloadKernel::new("k", -5.0, 1).is_err());
        assert!(WorkloadKernel::new("k", 10.0, 0).is_err());
        assert!(WorkloadKernel::with_variation("k", 10.0, 1, -1.0).is_err());
    }

    #[test]
    fn test_simulation_takes_roughly_the_interval() {
        let kernel = WorkloadKernel::with_variation("k", 200.0, 1, 0.0).unwrap();
        let inputs = SharedInputs::synthesize(ImageGeometry::with_frame(16, 16));
        let buffers = FrameBuffers::allocate(&inputs.geometry);

        let start = Instant::now();
        kernel.run(&buffers, &inputs).unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(5));
        assert!(elapsed < Duration::from_millis(50));
    }
}
