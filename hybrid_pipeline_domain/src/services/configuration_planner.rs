// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration Planner
//!
//! Enumerates the 2^N binary device configurations of the pipeline (bit 1 =
//! stage runs on the GPU in the primary path, bit 0 = CPU) and ranks them
//! by the effective throughput `λ` a closed queueing network predicts. For
//! the winning configurations it dimensions the admission queues through
//! the M/M/c/K/K solver, growing each path's population until utilisation
//! reaches its target; the resulting populations become queue depths and
//! their sum the token count.
//!
//! ## Algorithm
//!
//! 1. The bottleneck stage is the one whose slower device is slowest
//!    overall; configurations that place that stage on its slow device are
//!    pruned from the sweep.
//! 2. For each surviving configuration, aggregate primary-path service
//!    times (`TserGP`, `TserCP`) and the complementary secondary-path
//!    times (`TserCS`, `TserGS`).
//! 3. When one primary path clearly outruns the other (10% margin), the
//!    planner evaluates donating the idle capacity to a secondary helper
//!    path on the other device; the split is admitted only while the
//!    helper utilisation stays under 0.8.
//! 4. The all-GPU configuration is special: both full paths run in
//!    parallel (the pipeline decouples), so its `λ` is the sum of both
//!    path rates.
//! 5. The best five configurations are dimensioned and returned, ranked by
//!    effective `λ`.

use serde::{Deserialize, Serialize};

use crate::services::queueing_model::wait_time;
use crate::value_objects::DeviceKind;
use crate::PipelineError;

/// Utilisation target the dimensioning loop drives each path towards.
const RHO_TARGET: f64 = 0.95;

/// Margin by which one path must outrun the other before a secondary
/// helper path is considered.
const SPLIT_MARGIN: f64 = 0.9;

/// Helper paths are only admitted while their utilisation stays below this.
const SPLIT_RHO_LIMIT: f64 = 0.8;

/// Safety bound for the queue-growing loops.
const MAX_POPULATION: usize = 1024;

/// Secondary helper path chosen for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryPath {
    /// No helper; each stage runs only on its primary device.
    None,
    /// Leftover CPU cores form a helper path for the GPU-primary stages.
    Cpu,
    /// The GPU absorbs overflow from the CPU-primary stages.
    Gpu,
}

/// One ranked configuration with its queue dimensioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedConfiguration {
    /// Predicted throughput of the undimensioned configuration.
    pub lambda_opt: f64,
    /// Primary device per stage as a bit string; '1' = GPU.
    pub primary_config: String,
    /// Helper path decision.
    pub secondary: SecondaryPath,
    /// Effective throughput after queue dimensioning.
    pub lambda_effective: f64,
    /// Total tokens: `ngp + ncp + ngs + ncs`.
    pub tokens: usize,
    /// CPU cores assigned to the primary CPU path.
    pub primary_cpu_cores: usize,
    /// CPU cores left for the secondary CPU path.
    pub secondary_cpu_cores: usize,
    /// Effective rates of the four paths.
    pub lambda_gp: f64,
    pub lambda_cp: f64,
    pub lambda_gs: f64,
    pub lambda_cs: f64,
    /// Dimensioned populations of the four paths.
    pub ngp: usize,
    pub ncp: usize,
    pub ngs: usize,
    pub ncs: usize,
    /// The stage whose slower device bounds the whole pipeline.
    pub bottleneck_stage: usize,
    /// The device that is slow at the bottleneck stage.
    pub bottleneck_device: DeviceKind,
}

impl PlannedConfiguration {
    /// Whether every stage runs on the GPU primary path (the decoupled
    /// special case).
    pub fn is_all_gpu(&self) -> bool {
        self.primary_config.chars().all(|bit| bit == '1')
    }

    /// Primary device for a stage under this configuration.
    pub fn primary_device(&self, stage: usize) -> DeviceKind {
        match self.primary_config.as_bytes()[stage] {
            b'1' => DeviceKind::Gpu,
            _ => DeviceKind::Cpu,
        }
    }
}

/// Per-configuration evaluation state for the sweep.
#[derive(Debug, Clone, Copy)]
struct ConfigEval {
    tser_gp: f64,
    tser_cp: f64,
    tser_gs: f64,
    tser_cs: f64,
    p: f64,
    secondary: SecondaryPath,
    lambda: f64,
    rho_g: f64,
    rho_c: f64,
}

impl ConfigEval {
    fn unevaluated() -> Self {
        Self {
            tser_gp: 0.0,
            tser_cp: 0.0,
            tser_gs: 0.0,
            tser_cs: 0.0,
            p: 1.0,
            secondary: SecondaryPath::None,
            lambda: 0.0,
            rho_g: 1.0,
            rho_c: 1.0,
        }
    }
}

fn min_with_index(values: &[f64]) -> (f64, usize) {
    let mut best = (values[0], 0);
    for (index, &value) in values.iter().enumerate() {
        if value < best.0 {
            best = (value, index);
        }
    }
    best
}

fn gpu_bit(config_id: usize, num_stages: usize, stage: usize) -> bool {
    (config_id >> (num_stages - 1 - stage)) & 1 == 1
}

fn config_bits(config_id: usize, num_stages: usize) -> String {
    (0..num_stages)
        .map(|stage| if gpu_bit(config_id, num_stages, stage) { '1' } else { '0' })
        .collect()
}

/// Aggregates primary and secondary path service times for one
/// configuration. CPU service times are scaled by the core count since the
/// CPU path is a c-server station.
fn aggregate_service_times(
    config_id: usize,
    num_stages: usize,
    cpu_cores: usize,
    th_cpu: &[f64],
    th_gpu: &[f64],
) -> (f64, f64, f64, f64) {
    let nc = cpu_cores as f64;
    let (mut tser_gp, mut tser_cp, mut tser_gs, mut tser_cs) = (0.0, 0.0, 0.0, 0.0);
    for stage in 0..num_stages {
        if gpu_bit(config_id, num_stages, stage) {
            tser_gp += 1.0 / th_gpu[stage];
            tser_cs += 1.0 / (th_cpu[stage] / nc);
        } else {
            tser_cp += 1.0 / (th_cpu[stage] / nc);
            tser_gs += 1.0 / th_gpu[stage];
        }
    }
    (tser_gp, tser_cp, tser_gs, tser_cs)
}

/// Decides whether to donate idle capacity to a secondary path and
/// computes the configuration's effective arrival rate.
fn evaluate_split(eval: &mut ConfigEval, cpu_cores: usize) {
    let nc = cpu_cores as f64;
    let lambda_gp = 1.0 / eval.tser_gp;
    let lambda_cp = nc / eval.tser_cp;
    let mut lambda_g = lambda_gp;
    let mut lambda_c = lambda_cp;

    if lambda_gp < SPLIT_MARGIN * lambda_cp {
        // GPU-primary path binds: shift spare CPU capacity to a helper.
        let rho_c = ((nc * eval.tser_gp + eval.tser_cs) / (eval.tser_gp * eval.tser_cs))
            * ((eval.tser_cp * eval.tser_cs) / (eval.tser_cp + eval.tser_cs))
            * (1.0 / nc);
        eval.rho_c = rho_c;
        if rho_c < SPLIT_RHO_LIMIT {
            eval.secondary = SecondaryPath::Cpu;
            lambda_g = lambda_gp + (nc / eval.tser_cs) * (1.0 - rho_c);
            lambda_c = lambda_cp * rho_c;
            eval.p = lambda_gp / lambda_g;
        }
    } else if lambda_cp < SPLIT_MARGIN * lambda_gp {
        // CPU-primary path binds: let the GPU absorb overflow.
        let rho_g = ((nc * eval.tser_gs + eval.tser_cp) / (eval.tser_gs * eval.tser_cp))
            * ((eval.tser_gp * eval.tser_gs) / (eval.tser_gp + eval.tser_gs));
        eval.rho_g = rho_g;
        if rho_g < SPLIT_RHO_LIMIT {
            eval.secondary = SecondaryPath::Gpu;
            lambda_g = lambda_gp * rho_g;
            lambda_c = lambda_cp + (1.0 / eval.tser_gs) * (1.0 - rho_g);
            eval.p = lambda_cp / lambda_c;
        }
    }

    eval.lambda = lambda_g.min(lambda_c);
}

/// Grows a path's population until its utilisation reaches `rho_max`.
/// Returns `(population, effective_rate)`.
fn dimension_path(arrival: f64, service: f64, servers: usize, rho_max: f64) -> (usize, f64) {
    let mut population = 0;
    let mut rate = 0.0;
    let mut rho = 0.0;
    while rho < rho_max && population < MAX_POPULATION {
        population += 1;
        let est = wait_time(arrival, service, servers, population);
        rate = est.rate;
        rho = est.rho;
    }
    (population, rate)
}

/// Dimensions the winning configuration's queues via the closed-queue
/// solver and assembles the result record.
#[allow(clippy::too_many_arguments)]
fn dimension_configuration(
    config_id: usize,
    num_stages: usize,
    all_gpu_id: usize,
    eval: &ConfigEval,
    lambda_opt: f64,
    cpu_cores: usize,
    bottleneck_stage: usize,
    bottleneck_device: DeviceKind,
) -> PlannedConfiguration {
    let nc = cpu_cores as f64;
    let is_all_gpu = config_id == all_gpu_id;

    // Primary GPU path: M/M/1/NGP/NGP.
    let mut rho_max = RHO_TARGET;
    let arrival_gp = if is_all_gpu {
        eval.tser_gp
    } else {
        match eval.secondary {
            SecondaryPath::Cpu => 1.0 / (eval.p * lambda_opt),
            _ => 1.0 / lambda_opt,
        }
    };
    if eval.secondary == SecondaryPath::Gpu {
        rho_max = RHO_TARGET * eval.rho_g;
    }
    let (ngp, lambda_gp) = dimension_path(arrival_gp, eval.tser_gp, 1, rho_max);

    // Primary CPU path: M/M/c/NCP/NCP.
    let mut rho_max = RHO_TARGET;
    let primary_cpu_cores;
    let arrival_cp = if is_all_gpu {
        primary_cpu_cores = cpu_cores;
        eval.tser_cp
    } else {
        match eval.secondary {
            SecondaryPath::Cpu => {
                rho_max = RHO_TARGET * eval.rho_c;
                primary_cpu_cores = ((nc * eval.rho_c).round() as usize).max(1);
                1.0 / lambda_opt
            }
            SecondaryPath::Gpu => {
                primary_cpu_cores = ((nc * eval.rho_c).round() as usize).max(1);
                1.0 / (eval.p * lambda_opt)
            }
            SecondaryPath::None => {
                primary_cpu_cores = ((nc * eval.rho_c).round() as usize).max(1);
                1.0 / lambda_opt
            }
        }
    };
    let (ncp, lambda_cp) = dimension_path(arrival_cp, eval.tser_cp, cpu_cores, rho_max);

    // Secondary paths.
    let mut ngs = 0;
    let mut ncs = 0;
    let mut lambda_gs = 0.0;
    let mut lambda_cs = 0.0;
    let mut secondary_cpu_cores = 0;

    if eval.secondary == SecondaryPath::Gpu {
        let arrival = 1.0 / ((1.0 - eval.p) * lambda_opt);
        let rho_max = RHO_TARGET * (1.0 - eval.rho_g);
        let (population, rate) = dimension_path(arrival, eval.tser_gs, 1, rho_max);
        ngs = population;
        lambda_gs = rate;
    }

    if eval.secondary == SecondaryPath::Cpu {
        secondary_cpu_cores = cpu_cores.saturating_sub(primary_cpu_cores);
        if secondary_cpu_cores > 0 {
            let arrival = 1.0 / ((1.0 - eval.p) * lambda_opt);
            let rho_max = RHO_TARGET * (1.0 - eval.rho_c);
            let (population, rate) = dimension_path(arrival, eval.tser_cs, cpu_cores, rho_max);
            ncs = population;
            lambda_cs = rate;
        } else {
            // No cores left for a helper; the split degenerates and the
            // primary configuration stands unchanged.
            ncs = 1;
        }
    }

    let lambda_effective = if is_all_gpu {
        lambda_gp + lambda_cp
    } else {
        lambda_opt.min((lambda_gp + lambda_cs).min(lambda_cp + lambda_gs))
    };

    PlannedConfiguration {
        lambda_opt,
        primary_config: config_bits(config_id, num_stages),
        secondary: eval.secondary,
        lambda_effective,
        tokens: ngp + ncp + ngs + ncs,
        primary_cpu_cores,
        secondary_cpu_cores,
        lambda_gp,
        lambda_cp,
        lambda_gs,
        lambda_cs,
        ngp,
        ncp,
        ngs,
        ncs,
        bottleneck_stage,
        bottleneck_device,
    }
}

/// Ranks device configurations by predicted throughput.
///
/// `th_cpu[i]` / `th_gpu[i]` are per-stage service rates in frames per
/// second (the CPU rate is the aggregate over all cores); `cpu_cores` is
/// the CPU worker count. Returns up to five configurations, best first.
pub fn plan_configurations(
    num_stages: usize,
    th_cpu: &[f64],
    th_gpu: &[f64],
    cpu_cores: usize,
) -> Result<Vec<PlannedConfiguration>, PipelineError> {
    if num_stages == 0 || th_cpu.len() != num_stages || th_gpu.len() != num_stages {
        return Err(PipelineError::invalid_config(
            "planner needs one CPU and one GPU rate per stage",
        ));
    }
    if cpu_cores == 0 {
        return Err(PipelineError::invalid_config("planner needs at least one CPU core"));
    }
    if th_cpu.iter().chain(th_gpu.iter()).any(|rate| !rate.is_finite() || *rate <= 0.0) {
        return Err(PipelineError::invalid_config("stage service rates must be positive"));
    }

    // The stage whose slower device is slowest overall must not run on that
    // device in the primary path; configurations that would are pruned.
    let (cpu_floor, cpu_floor_stage) = min_with_index(th_cpu);
    let (gpu_floor, gpu_floor_stage) = min_with_index(th_gpu);
    let cpu_is_bottleneck = cpu_floor < gpu_floor;
    let bottleneck_stage = if cpu_is_bottleneck { cpu_floor_stage } else { gpu_floor_stage };
    let bottleneck_device = if cpu_is_bottleneck { DeviceKind::Cpu } else { DeviceKind::Gpu };
    let mandated_gpu_bit = cpu_is_bottleneck;

    let config_count = 1usize << num_stages;
    let all_gpu_id = config_count - 1;
    let mut evals = vec![ConfigEval::unevaluated(); config_count];

    for config_id in 1..config_count {
        let (tser_gp, tser_cp, tser_gs, tser_cs) =
            aggregate_service_times(config_id, num_stages, cpu_cores, th_cpu, th_gpu);
        let eval = &mut evals[config_id];
        eval.tser_gp = tser_gp;
        eval.tser_cp = tser_cp;
        eval.tser_gs = tser_gs;
        eval.tser_cs = tser_cs;

        if config_id == all_gpu_id {
            // All-GPU runs decoupled: both full paths in parallel.
            eval.lambda = 1.0 / tser_gp + cpu_cores as f64 / tser_cp;
            continue;
        }

        if gpu_bit(config_id, num_stages, bottleneck_stage) != mandated_gpu_bit {
            continue;
        }
        if tser_gp == 0.0 || tser_cp == 0.0 {
            continue;
        }
        evaluate_split(eval, cpu_cores);
    }

    let mut lambdas: Vec<f64> = evals.iter().map(|eval| eval.lambda).collect();
    let mut results = Vec::new();
    for _ in 0..5 {
        let mut best_id = 0;
        let mut best_lambda = 0.0f64;
        for (id, &lambda) in lambdas.iter().enumerate() {
            if lambda > best_lambda {
                best_lambda = lambda;
                best_id = id;
            }
        }
        if best_lambda == 0.0 {
            break;
        }
        results.push(dimension_configuration(
            best_id,
            num_stages,
            all_gpu_id,
            &evals[best_id],
            best_lambda,
            cpu_cores,
            bottleneck_stage,
            bottleneck_device,
        ));
        lambdas[best_id] = 0.0;
    }

    results.sort_by(|a, b| {
        b.lambda_effective
            .partial_cmp(&a.lambda_effective)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}
