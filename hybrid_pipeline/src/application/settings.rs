// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Settings
//!
//! Binds the structurally validated CLI arguments to domain types and
//! resolves every default: stage policies from the configuration string,
//! device priorities, per-stage core counts and queue depths, token and
//! ring capacities, and the admission topology itself.
//!
//! ## Configuration String Forms
//!
//! - `"CPU"` or all-`0` - every stage pinned to the CPU
//! - `"GPU"` or all-`2` - every stage pinned to the GPU
//! - `"DECOUPLED"` - every stage adaptive, device chosen once at entry
//! - digit string (`"012"`, …) - explicit per-stage policies
//!
//! `--auto` overrides the string: sampling needs every stage adaptive, so
//! all stages become `CpuOrGpu` with queueless admission until the tuner
//! commits its configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hybrid_pipeline_bootstrap::ValidatedCli;
use hybrid_pipeline_domain::value_objects::{
    AcquisitionMode, CouplingMode, DeviceKind, ImageGeometry, StagePolicy,
};
use hybrid_pipeline_domain::PipelineError;

use crate::application::engines::EngineKind;
use crate::infrastructure::runtime::{DeviceUnit, ResourceManager};
use crate::infrastructure::stages::StageRegistry;

/// Default ring capacity multiplier over the in-flight frame count.
const RING_CAPACITY_FACTOR: usize = 4;

/// Default GPU core count per stage.
const DEFAULT_GPU_CORES: usize = 1;

/// Default GPU queue depth for adaptive stages.
const DEFAULT_ADAPTIVE_QUEUE: usize = 1;

/// Fully resolved, immutable settings of one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub engine: EngineKind,
    pub num_stages: usize,
    pub threads: usize,
    pub geometry: ImageGeometry,
    /// Frame budget; `usize::MAX` while a duration drives termination.
    pub num_frames: usize,
    pub duration: Option<Duration>,
    pub sampling_window: Option<Duration>,
    pub auto_tune: bool,
    pub acquisition: AcquisitionMode,
    pub tokens: usize,
    pub ring_capacity: usize,
    pub chain_serial_events: bool,
    pub gpu_active: bool,
    pub report_path: Option<PathBuf>,
    pub config_label: String,
    pub policies: Vec<StagePolicy>,
    pub priorities: Vec<DeviceKind>,
    pub coupling: CouplingMode,
    pub cores_cpu: Vec<usize>,
    pub cores_gpu: Vec<usize>,
    pub sizes_cpu: Vec<usize>,
    pub sizes_gpu: Vec<usize>,
    pub workload: Option<(Vec<f64>, Vec<f64>)>,
}

/// Broadcasts a CLI vector to one value per stage: absent → default,
/// single value → repeated, exact arity → as-is.
fn broadcast<T: Copy>(values: &Option<Vec<T>>, num_stages: usize, default: T, flag: &str) -> Result<Vec<T>, PipelineError> {
    match values {
        None => Ok(vec![default; num_stages]),
        Some(values) if values.len() == 1 => Ok(vec![values[0]; num_stages]),
        Some(values) if values.len() == num_stages => Ok(values.clone()),
        Some(values) => Err(PipelineError::invalid_config(format!(
            "--{} takes 1 or {} values, got {}",
            flag,
            num_stages,
            values.len()
        ))),
    }
}

impl RunSettings {
    /// Resolves validated CLI arguments into run settings.
    pub fn from_cli(cli: &ValidatedCli) -> Result<Self, PipelineError> {
        let engine = EngineKind::from_name(&cli.api)?;
        let geometry = ImageGeometry::from_resolution(cli.resolution)?;

        // Stage count: an explicit digit string fixes it; the named forms
        // default to the three-stage image pipeline.
        let digit_config = cli.config.chars().all(|c| c.is_ascii_digit());
        let num_stages = if digit_config { cli.config.chars().count() } else { 3 };

        let workload = match (&cli.thcpu, &cli.thgpu) {
            (None, None) => None,
            (th_cpu, th_gpu) => {
                let cpu = broadcast(th_cpu, num_stages, 0.0, "thcpu")?;
                let gpu = broadcast(th_gpu, num_stages, 0.0, "thgpu")?;
                if cpu.iter().chain(gpu.iter()).any(|rate| *rate <= 0.0) {
                    return Err(PipelineError::invalid_config(
                        "workload simulation needs both --thcpu and --thgpu rates",
                    ));
                }
                Some((cpu, gpu))
            }
        };
        if workload.is_none() && num_stages != 3 {
            return Err(PipelineError::invalid_config(format!(
                "the image pipeline has 3 stages; config '{}' names {}",
                cli.config, num_stages
            )));
        }

        // Bind the configuration string.
        let mut coupling = CouplingMode::Coupled;
        let mut config_label = cli.config.clone();
        let policies = if cli.auto {
            config_label = "AUTO".to_string();
            vec![StagePolicy::CpuOrGpu; num_stages]
        } else if cli.config == "CPU" {
            config_label = "CPU-only".to_string();
            vec![StagePolicy::CpuOnly; num_stages]
        } else if cli.config == "GPU" {
            config_label = "GPU-only".to_string();
            vec![StagePolicy::GpuOnly; num_stages]
        } else if cli.config == "DECOUPLED" {
            config_label = "Decoupled".to_string();
            coupling = CouplingMode::Decoupled;
            vec![StagePolicy::CpuOrGpu; num_stages]
        } else if digit_config {
            if cli.config.chars().all(|c| c == '0') {
                config_label = "CPU-only".to_string();
            } else if cli.config.chars().all(|c| c == '2') {
                config_label = "GPU-only".to_string();
            }
            StagePolicy::parse_config(&cli.config, num_stages)?
        } else {
            return Err(PipelineError::invalid_config(format!(
                "config must be CPU, GPU, DECOUPLED or a digit string, got '{}'",
                cli.config
            )));
        };

        let gpu_active = policies.iter().any(|policy| policy.allows(DeviceKind::Gpu));

        // Device priorities: explicit digits, or derived from the policy
        // (adaptive and GPU-pinned stages prefer the GPU).
        let priorities = match &cli.prefdevice {
            Some(_) => broadcast(&cli.prefdevice, num_stages, 0, "prefdevice")?
                .into_iter()
                .map(DeviceKind::from_priority_digit)
                .collect::<Result<Vec<_>, _>>()?,
            None => policies
                .iter()
                .map(|policy| {
                    if policy.allows(DeviceKind::Gpu) {
                        DeviceKind::Gpu
                    } else {
                        DeviceKind::Cpu
                    }
                })
                .collect(),
        };

        let priority_custom = cli.prefdevice.is_some();
        if priority_custom && coupling == CouplingMode::Coupled {
            coupling = CouplingMode::CoupledCustom;
        }

        let tokens = cli.iff.unwrap_or(cli.threads + usize::from(gpu_active)).max(1);
        let ring_capacity = cli.buffersize.unwrap_or(tokens * RING_CAPACITY_FACTOR).max(tokens);

        // Per-stage core counts and queue depths, with policy-aware
        // defaults: a device a stage cannot use gets zero of both.
        let queueless = cli.acqmode == 2 || cli.auto;
        let mut cores_cpu = broadcast(&cli.corescpu, num_stages, cli.threads, "corescpu")?;
        let mut cores_gpu = broadcast(&cli.coresgpu, num_stages, DEFAULT_GPU_CORES, "coresgpu")?;
        let default_cpu_queue = if queueless { 0 } else { tokens };
        let default_gpu_queue = if queueless { 0 } else { tokens };
        let mut sizes_cpu = broadcast(&cli.sizecpu, num_stages, default_cpu_queue, "sizecpu")?;
        let mut sizes_gpu = broadcast(&cli.sizegpu, num_stages, default_gpu_queue, "sizegpu")?;

        for (stage, policy) in policies.iter().enumerate() {
            match policy {
                StagePolicy::CpuOnly => {
                    cores_gpu[stage] = 0;
                    sizes_gpu[stage] = 0;
                }
                StagePolicy::GpuOnly => {
                    cores_cpu[stage] = 0;
                    sizes_cpu[stage] = 0;
                }
                StagePolicy::CpuOrGpu => {
                    // Adaptive stages default to shallow queues so the
                    // path selector spreads load instead of parking.
                    if cli.sizecpu.is_none() && !queueless {
                        sizes_cpu[stage] = DEFAULT_ADAPTIVE_QUEUE;
                    }
                    if cli.sizegpu.is_none() && !queueless {
                        sizes_gpu[stage] = DEFAULT_ADAPTIVE_QUEUE;
                    }
                }
            }
        }

        Ok(Self {
            engine,
            num_stages,
            threads: cli.threads,
            geometry,
            num_frames: cli.numframes.unwrap_or(if cli.duration.is_some() {
                usize::MAX
            } else {
                1000
            }),
            duration: cli.duration,
            sampling_window: cli.timesampling,
            auto_tune: cli.auto,
            acquisition: AcquisitionMode::from_index(cli.acqmode)?,
            tokens,
            ring_capacity,
            chain_serial_events: cli.dependson,
            gpu_active,
            report_path: cli.report.clone(),
            config_label,
            policies,
            priorities,
            coupling,
            cores_cpu,
            cores_gpu,
            sizes_cpu,
            sizes_gpu,
            workload,
        })
    }

    /// Builds the admission topology these settings describe.
    pub fn build_resources(&self) -> ResourceManager {
        let all_gpu = self.policies.iter().all(|policy| *policy == StagePolicy::GpuOnly);
        let all_cpu = self.policies.iter().all(|policy| *policy == StagePolicy::CpuOnly);

        let cpu_total = if all_gpu { 0 } else { self.threads };
        let gpu_total = if all_cpu {
            0
        } else {
            self.cores_gpu.iter().copied().max().unwrap_or(DEFAULT_GPU_CORES).max(1)
        };

        let cpu = Arc::new(DeviceUnit::new(DeviceKind::Cpu, cpu_total));
        let gpu = Arc::new(DeviceUnit::new(DeviceKind::Gpu, gpu_total));
        for stage in 0..self.num_stages {
            cpu.add_stage(stage, self.cores_cpu[stage], self.sizes_cpu[stage]);
            gpu.add_stage(stage, self.cores_gpu[stage], self.sizes_gpu[stage]);
            // Identity mapping onto units that were just added.
            let _ = cpu.map_stage(stage, stage);
            let _ = gpu.map_stage(stage, stage);
        }

        let mut manager = ResourceManager::new();
        manager.add_device(cpu);
        manager.add_device(gpu);
        manager
    }

    /// Builds the stage-function table these settings describe.
    pub fn build_registry(&self) -> Result<StageRegistry, PipelineError> {
        match &self.workload {
            Some((th_cpu, th_gpu)) => StageRegistry::workload(th_cpu, th_gpu, self.threads),
            None => Ok(StageRegistry::image_filters()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_pipeline_bootstrap::cli::{validate, Cli};
    use clap::Parser;

    fn settings_from(args: &[&str]) -> Result<RunSettings, PipelineError> {
        let mut full = vec!["hybrid_pipeline"];
        full.extend_from_slice(args);
        let cli = validate(Cli::parse_from(full)).expect("cli should validate");
        RunSettings::from_cli(&cli)
    }

    #[test]
    fn test_named_config_forms() {
        let cpu = settings_from(&["--config", "CPU"]).unwrap();
        assert!(cpu.policies.iter().all(|p| *p == StagePolicy::CpuOnly));
        assert!(!cpu.gpu_active);

        let gpu = settings_from(&["--config", "GPU"]).unwrap();
        assert!(gpu.policies.iter().all(|p| *p == StagePolicy::GpuOnly));

        let decoupled = settings_from(&["--config", "DECOUPLED"]).unwrap();
        assert_eq!(decoupled.coupling, CouplingMode::Decoupled);
        assert!(decoupled.policies.iter().all(|p| *p == StagePolicy::CpuOrGpu));
    }

    #[test]
    fn test_digit_config_binds_policies() {
        let settings = settings_from(&["--config", "012"]).unwrap();
        assert_eq!(
            settings.policies,
            vec![StagePolicy::CpuOnly, StagePolicy::CpuOrGpu, StagePolicy::GpuOnly]
        );
        // GPU-ineligible stages get no GPU resources and vice versa.
        assert_eq!(settings.cores_gpu[0], 0);
        assert_eq!(settings.cores_cpu[2], 0);
    }

    #[test]
    fn test_tokens_and_ring_defaults() {
        let settings = settings_from(&["--config", "111", "--threads", "4"]).unwrap();
        assert_eq!(settings.tokens, 5); // threads + GPU
        assert_eq!(settings.ring_capacity, 20);

        let fixed = settings_from(&["--config", "111", "--iff", "3", "--buffersize", "7"]).unwrap();
        assert_eq!(fixed.tokens, 3);
        assert_eq!(fixed.ring_capacity, 7);
    }

    #[test]
    fn test_priorities_derived_from_policy() {
        let settings = settings_from(&["--config", "021"]).unwrap();
        assert_eq!(
            settings.priorities,
            vec![DeviceKind::Cpu, DeviceKind::Gpu, DeviceKind::Gpu]
        );
    }

    #[test]
    fn test_explicit_priorities_switch_to_custom_coupling() {
        let settings = settings_from(&["--config", "111", "--prefdevice", "2"]).unwrap();
        assert_eq!(settings.coupling, CouplingMode::CoupledCustom);
        assert!(settings.priorities.iter().all(|kind| *kind == DeviceKind::Gpu));
    }

    #[test]
    fn test_workload_stage_count_follows_config() {
        let settings = settings_from(&[
            "--config", "0101", "--thcpu", "100", "--thgpu", "200,300,400,500",
        ])
        .unwrap();
        assert_eq!(settings.num_stages, 4);
        let (cpu, gpu) = settings.workload.unwrap();
        assert_eq!(cpu, vec![100.0; 4]);
        assert_eq!(gpu, vec![200.0, 300.0, 400.0, 500.0]);
    }

    #[test]
    fn test_workload_requires_both_rates() {
        assert!(settings_from(&["--config", "111", "--thcpu", "100"]).is_err());
    }

    #[test]
    fn test_image_pipeline_requires_three_stages() {
        assert!(settings_from(&["--config", "0110"]).is_err());
    }

    #[test]
    fn test_build_resources_topology() {
        let settings = settings_from(&["--config", "012", "--threads", "4"]).unwrap();
        let manager = settings.build_resources();

        let cpu = manager.device(DeviceKind::Cpu).unwrap();
        let gpu = manager.device(DeviceKind::Gpu).unwrap();
        assert_eq!(cpu.total_cores(), 4);
        assert_eq!(gpu.total_cores(), 1);
        // Stage 2 is GPU-only: no CPU unit capacity there.
        assert_eq!(cpu.stage(2).unwrap().total_cores(), 0);
        assert_eq!(gpu.stage(2).unwrap().total_cores(), 1);
    }

    #[test]
    fn test_auto_mode_forces_adaptive_queueless_sampling() {
        let settings = settings_from(&["--config", "000", "--auto", "--threads", "2"]).unwrap();
        assert!(settings.policies.iter().all(|p| *p == StagePolicy::CpuOrGpu));
        assert_eq!(settings.config_label, "AUTO");
        assert!(settings.sizes_cpu.iter().all(|&q| q == 0));
        assert!(settings.sizes_gpu.iter().all(|&q| q == 0));
    }
}
