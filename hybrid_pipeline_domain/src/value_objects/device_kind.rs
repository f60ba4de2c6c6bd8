// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Device Kind Value Object
//!
//! Identifies a physical execution backend. The system manages exactly two:
//! a CPU worker pool and one GPU accelerator. Every admission decision,
//! per-frame device history entry, and metrics bucket is keyed by this
//! enum.
//!
//! ## Usage
//!
//! ```
//! use hybrid_pipeline_domain::value_objects::DeviceKind;
//!
//! let kind = DeviceKind::Gpu;
//! assert_eq!(kind.other(), DeviceKind::Cpu);
//! assert_eq!(kind.to_string(), "GPU");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PipelineError;

/// A physical execution backend.
///
/// The dispatch layer supports at most one device of each kind; "the other
/// device" is therefore always well defined, which the resources manager
/// relies on when it swaps primary and secondary paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// The host CPU worker pool.
    Cpu,
    /// The GPU accelerator.
    Gpu,
}

impl DeviceKind {
    /// Returns the counterpart device.
    pub fn other(self) -> Self {
        match self {
            DeviceKind::Cpu => DeviceKind::Gpu,
            DeviceKind::Gpu => DeviceKind::Cpu,
        }
    }

    /// Short uppercase name, used in logs and report records.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Gpu => "GPU",
        }
    }

    /// Parses the single-digit priority encoding used on the command line
    /// (`0` = CPU, `2` = GPU).
    pub fn from_priority_digit(digit: u32) -> Result<Self, PipelineError> {
        match digit {
            0 => Ok(DeviceKind::Cpu),
            2 => Ok(DeviceKind::Gpu),
            other => Err(PipelineError::invalid_config(format!(
                "preferred device must be 0 (CPU) or 2 (GPU), got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
