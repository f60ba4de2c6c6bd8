// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Closed Queueing Model (M/M/c/K/K)
//!
//! Engset-type finite-population queue solver used by the configuration
//! planner to dimension admission queues. The model describes `population`
//! request sources (in-flight frames) feeding `servers` identical servers;
//! each source thinks for `arrival` time units between requests and each
//! service takes `active` time units.
//!
//! For state probabilities the solver computes, with `z = active/arrival`:
//!
//! ```text
//! f[i]  = (K-i)·active / (arrival·(i+1))   for i < c
//!       = (K-i)·active / (arrival·c)       otherwise
//! fp[i] = Π_{j≤i} f[j]
//! p0    = 1 / (1 + Σ fp)
//! p[i]  = fp[i] · p0
//! ```
//!
//! and derives `L` (mean requests in system), `Lq` (mean queue length),
//! `Wq` (mean queue wait), the effective arrival rate `λe = (K-L)/arrival`
//! and the utilisation `ρ = λe·active/c`. The planner grows `K` until `ρ`
//! reaches its target, which yields the queue depth for one service path.

/// Steady-state estimates for one (arrival, service, c, K) point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitTimeEstimate {
    /// Mean number of requests waiting (not in service).
    pub lq: f64,
    /// Mean time a request waits before service.
    pub wq: f64,
    /// Effective arrival rate `λe`.
    pub rate: f64,
    /// Probability that all servers are busy.
    pub prob_occupancy: f64,
    /// Server utilisation `ρ`.
    pub rho: f64,
}

impl WaitTimeEstimate {
    const ZERO: WaitTimeEstimate = WaitTimeEstimate {
        lq: 0.0,
        wq: 0.0,
        rate: 0.0,
        prob_occupancy: 0.0,
        rho: 0.0,
    };
}

/// Solves the M/M/c/K/K model for one configuration point.
///
/// `arrival` and `active` are mean inter-arrival and service times in the
/// same unit; `servers` is the number of parallel servers (c); `population`
/// the closed population (K). Degenerate inputs (zero population or a
/// vanishing normalisation sum) yield the all-zero estimate, matching the
/// planner's treatment of infeasible configurations.
pub fn wait_time(arrival: f64, active: f64, servers: usize, population: usize) -> WaitTimeEstimate {
    if population == 0 || servers == 0 || arrival <= 0.0 || active <= 0.0 {
        return WaitTimeEstimate::ZERO;
    }

    let k = population;
    let c = servers;
    let z = active / arrival;

    let mut f = vec![0.0f64; k];
    for (i, slot) in f.iter_mut().enumerate() {
        let remaining = (k - i) as f64;
        *slot = if i < c {
            remaining * active / (arrival * (i as f64 + 1.0))
        } else {
            remaining * active / (arrival * c as f64)
        };
    }

    let mut fp = vec![0.0f64; k];
    let mut running = 1.0;
    for (slot, factor) in fp.iter_mut().zip(&f) {
        running *= factor;
        *slot = running;
    }

    let sum_fp: f64 = fp.iter().sum();
    if sum_fp == 0.0 {
        return WaitTimeEstimate::ZERO;
    }
    let p0 = 1.0 / (1.0 + sum_fp);

    let pn: Vec<f64> = fp.iter().map(|fp_i| fp_i * p0).collect();

    let busy_from = (c - 1).min(pn.len());
    let prob_occupancy: f64 = pn[busy_from..].iter().sum();

    let l: f64 = pn.iter().enumerate().map(|(i, p)| (i as f64 + 1.0) * p).sum();

    let lq = (l - z * (k as f64 - l)).max(0.0);
    let wq = lq * arrival / (k as f64 - l);
    let rate = (k as f64 - l) / arrival;
    let rho = rate * active / c as f64;

    WaitTimeEstimate {
        lq,
        wq,
        rate,
        prob_occupancy,
        rho,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_server_single_source() {
        // K=1, c=1, arrival=active=1: the lone source is in service half
        // the time, so λe = 0.5 and ρ = 0.5 with an empty queue.
        let est = wait_time(1.0, 1.0, 1, 1);
        assert!((est.rate - 0.5).abs() < 1e-12);
        assert!((est.rho - 0.5).abs() < 1e-12);
        assert_eq!(est.lq, 0.0);
        assert!((est.prob_occupancy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_two_sources_share_one_server() {
        // K=2, c=1, arrival=active=1: p0=0.2, p=[0.4,0.4],
        // L=1.2, Lq=0.4, λe=0.8, ρ=0.8.
        let est = wait_time(1.0, 1.0, 1, 2);
        assert!((est.lq - 0.4).abs() < 1e-12);
        assert!((est.wq - 0.5).abs() < 1e-12);
        assert!((est.rate - 0.8).abs() < 1e-12);
        assert!((est.rho - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_utilisation_grows_with_population() {
        let mut last_rho = 0.0;
        for population in 1..16 {
            let est = wait_time(2.0, 1.0, 1, population);
            assert!(est.rho >= last_rho);
            last_rho = est.rho;
        }
        // Never exceeds full utilisation.
        assert!(last_rho <= 1.0 + 1e-9);
    }

    #[test]
    fn test_more_servers_lower_utilisation() {
        let one = wait_time(1.0, 1.0, 1, 8);
        let four = wait_time(1.0, 1.0, 4, 8);
        assert!(four.rho < one.rho);
        assert!(four.lq < one.lq);
    }

    #[test]
    fn test_degenerate_inputs_yield_zero() {
        assert_eq!(wait_time(1.0, 1.0, 1, 0), WaitTimeEstimate::ZERO);
        assert_eq!(wait_time(0.0, 1.0, 1, 4), WaitTimeEstimate::ZERO);
        assert_eq!(wait_time(1.0, 0.0, 1, 4), WaitTimeEstimate::ZERO);
        assert_eq!(wait_time(1.0, 1.0, 0, 4), WaitTimeEstimate::ZERO);
    }

    proptest::proptest! {
        /// Steady-state sanity over arbitrary valid inputs: nothing is
        /// negative, utilisation stays bounded, and the queue never holds
        /// more than the population.
        #[test]
        fn prop_estimates_stay_physical(
            arrival in 0.01f64..100.0,
            active in 0.01f64..100.0,
            servers in 1usize..8,
            population in 1usize..64,
        ) {
            let est = wait_time(arrival, active, servers, population);
            proptest::prop_assert!(est.lq >= 0.0);
            proptest::prop_assert!(est.wq >= 0.0);
            proptest::prop_assert!(est.rate >= 0.0);
            proptest::prop_assert!(est.rho >= 0.0);
            proptest::prop_assert!(est.rho <= 1.0 + 1e-9);
            proptest::prop_assert!(est.lq <= population as f64);
            proptest::prop_assert!((0.0..=1.0 + 1e-9).contains(&est.prob_occupancy));
        }
    }
}
