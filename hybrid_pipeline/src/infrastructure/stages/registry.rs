// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Function Registry
//!
//! Runtime table mapping `(stage index, device kind)` to a kernel. The
//! dispatcher calls through this seam, which is what keeps the engines
//! generic over what the stages actually compute: the default image
//! filters, workload simulations, and the test suite's instrumented
//! kernels all register through the same trait.

use std::sync::Arc;

use hybrid_pipeline_domain::entities::FrameBuffers;
use hybrid_pipeline_domain::value_objects::DeviceKind;
use hybrid_pipeline_domain::PipelineError;

use crate::infrastructure::stages::filters::{BlockHistogram, CosineFilter, PairwiseDistance};
use crate::infrastructure::stages::workload::WorkloadKernel;
use crate::infrastructure::stages::SharedInputs;

/// One stage function. Implementations transform a frame's scratch planes
/// given the shared read-only inputs; they know nothing about devices,
/// admission, or timing.
pub trait StageKernel: Send + Sync {
    /// Kernel name for traces and logs.
    fn name(&self) -> &str;

    /// Runs the kernel against one frame's scratch planes.
    fn run(&self, buffers: &FrameBuffers, inputs: &SharedInputs) -> Result<(), PipelineError>;
}

#[derive(Clone)]
struct StageSlot {
    cpu: Arc<dyn StageKernel>,
    gpu: Arc<dyn StageKernel>,
}

/// Table of stage functions for one run.
#[derive(Clone)]
pub struct StageRegistry {
    stages: Vec<StageSlot>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .stages
            .iter()
            .map(|slot| (slot.cpu.name().to_string(), slot.gpu.name().to_string()))
            .collect();
        f.debug_struct("StageRegistry").field("stages", &names).finish()
    }
}

impl StageRegistry {
    /// Builds an empty registry; pair with [`StageRegistry::push_stage`].
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage with its CPU and GPU kernels.
    pub fn push_stage(&mut self, cpu: Arc<dyn StageKernel>, gpu: Arc<dyn StageKernel>) {
        self.stages.push(StageSlot { cpu, gpu });
    }

    /// The default three-stage image pipeline. Both devices run the same
    /// scalar kernels; what distinguishes the GPU path is *where* the
    /// kernel executes (the in-order submission queue), not its code.
    pub fn image_filters() -> Self {
        let mut registry = Self::new();
        registry.push_stage(Arc::new(CosineFilter), Arc::new(CosineFilter));
        registry.push_stage(Arc::new(BlockHistogram), Arc::new(BlockHistogram));
        registry.push_stage(Arc::new(PairwiseDistance), Arc::new(PairwiseDistance));
        registry
    }

    /// Workload-simulation registry from per-stage service rates.
    ///
    /// `th_cpu[i]` is the aggregate CPU rate of stage `i` over
    /// `cpu_threads` cores; `th_gpu[i]` the GPU rate.
    pub fn workload(th_cpu: &[f64], th_gpu: &[f64], cpu_threads: usize) -> Result<Self, PipelineError> {
        if th_cpu.len() != th_gpu.len() || th_cpu.is_empty() {
            return Err(PipelineError::invalid_config(
                "workload registry needs matching CPU and GPU rate vectors",
            ));
        }
        let mut registry = Self::new();
        for (stage, (&cpu_rate, &gpu_rate)) in th_cpu.iter().zip(th_gpu).enumerate() {
            registry.push_stage(
                Arc::new(WorkloadKernel::new(
                    format!("workload_cpu_{}", stage),
                    cpu_rate,
                    cpu_threads,
                )?),
                Arc::new(WorkloadKernel::new(format!("workload_gpu_{}", stage), gpu_rate, 1)?),
            );
        }
        Ok(registry)
    }

    /// Number of stages in the table.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// The kernel registered for a stage on a device.
    pub fn kernel(&self, stage: usize, kind: DeviceKind) -> &Arc<dyn StageKernel> {
        let slot = &self.stages[stage];
        match kind {
            DeviceKind::Cpu => &slot.cpu,
            DeviceKind::Gpu => &slot.gpu,
        }
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
