// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Execution Policy
//!
//! Per-stage device eligibility. A stage may be pinned to one device or
//! left free to run on either, in which case the resources manager balances
//! admissions between the two.
//!
//! ## Configuration String
//!
//! Users describe the whole pipeline as a compact digit string, one digit
//! per stage:
//!
//! - `0` - CPU only
//! - `1` - CPU or GPU (adaptive)
//! - `2` - GPU only
//!
//! `"012"` therefore pins stage 0 to the CPU, lets stage 1 float, and pins
//! stage 2 to the GPU. The string length must equal the number of pipeline
//! stages; anything else is a configuration error reported at startup.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::DeviceKind;
use crate::PipelineError;

/// Device eligibility for one virtual stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagePolicy {
    /// The stage may only run on the CPU.
    CpuOnly,
    /// The stage may run on either device; admission decides per frame.
    CpuOrGpu,
    /// The stage may only run on the GPU.
    GpuOnly,
}

impl StagePolicy {
    /// Parses a single configuration digit.
    pub fn from_digit(digit: char) -> Result<Self, PipelineError> {
        match digit {
            '0' => Ok(StagePolicy::CpuOnly),
            '1' => Ok(StagePolicy::CpuOrGpu),
            '2' => Ok(StagePolicy::GpuOnly),
            other => Err(PipelineError::invalid_config(format!(
                "stage policy digit must be one of 0/1/2, got '{}'",
                other
            ))),
        }
    }

    /// Parses a full configuration string of exactly `num_stages` digits.
    pub fn parse_config(config: &str, num_stages: usize) -> Result<Vec<Self>, PipelineError> {
        if config.chars().count() != num_stages {
            return Err(PipelineError::invalid_config(format!(
                "config string '{}' must have exactly {} digits",
                config, num_stages
            )));
        }
        config.chars().map(Self::from_digit).collect()
    }

    /// Whether the given device is eligible under this policy.
    pub fn allows(self, kind: DeviceKind) -> bool {
        match self {
            StagePolicy::CpuOnly => kind == DeviceKind::Cpu,
            StagePolicy::GpuOnly => kind == DeviceKind::Gpu,
            StagePolicy::CpuOrGpu => true,
        }
    }

    /// The device this policy pins to, if it pins at all.
    pub fn pinned_device(self) -> Option<DeviceKind> {
        match self {
            StagePolicy::CpuOnly => Some(DeviceKind::Cpu),
            StagePolicy::GpuOnly => Some(DeviceKind::Gpu),
            StagePolicy::CpuOrGpu => None,
        }
    }

    /// The configuration digit for this policy.
    pub fn digit(self) -> char {
        match self {
            StagePolicy::CpuOnly => '0',
            StagePolicy::CpuOrGpu => '1',
            StagePolicy::GpuOnly => '2',
        }
    }
}

impl fmt::Display for StagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StagePolicy::CpuOnly => "CPU",
            StagePolicy::CpuOrGpu => "CPU_GPU",
            StagePolicy::GpuOnly => "GPU",
        };
        f.write_str(name)
    }
}

/// Renders a policy vector back into its configuration string.
pub fn config_string(policies: &[StagePolicy]) -> String {
    policies.iter().map(|p| p.digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let policies = StagePolicy::parse_config("012", 3).unwrap();
        assert_eq!(
            policies,
            vec![StagePolicy::CpuOnly, StagePolicy::CpuOrGpu, StagePolicy::GpuOnly]
        );
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(StagePolicy::parse_config("01", 3).is_err());
        assert!(StagePolicy::parse_config("0123", 3).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_digit() {
        assert!(StagePolicy::parse_config("013", 3).is_err());
        assert!(StagePolicy::parse_config("0x2", 3).is_err());
    }

    #[test]
    fn test_eligibility() {
        assert!(StagePolicy::CpuOnly.allows(DeviceKind::Cpu));
        assert!(!StagePolicy::CpuOnly.allows(DeviceKind::Gpu));
        assert!(StagePolicy::GpuOnly.allows(DeviceKind::Gpu));
        assert!(!StagePolicy::GpuOnly.allows(DeviceKind::Cpu));
        assert!(StagePolicy::CpuOrGpu.allows(DeviceKind::Cpu));
        assert!(StagePolicy::CpuOrGpu.allows(DeviceKind::Gpu));
    }

    #[test]
    fn test_config_string_round_trip() {
        let policies = StagePolicy::parse_config("120", 3).unwrap();
        assert_eq!(config_string(&policies), "120");
    }
}
