// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Acquisition Protocol Types
//!
//! The admission layer speaks a small status-typed protocol. Every attempt
//! to run a stage on a device resolves to exactly one of three outcomes:
//!
//! - `AcquiredCore` - a core was free and is now held by the caller.
//! - `Enqueued` - the caller waited in a bounded FIFO and now holds a core.
//! - `Failed` - no core and no queue slot; the caller must try elsewhere
//!   or retry later. Failure never blocks.
//!
//! `AcquisitionMode` selects the order in which the resources manager
//! walks its attempt table; see the mode table in the resources manager
//! documentation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PipelineError;

/// Result of a core acquisition attempt on a stage/device pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStatus {
    /// A core was acquired directly, without queuing.
    AcquiredCore,
    /// The caller was enqueued and has since been granted a core.
    Enqueued,
    /// No core available and no queue slot free.
    Failed,
}

impl AcquisitionStatus {
    /// Whether the caller now holds a core and owes exactly one release.
    pub fn is_admitted(self) -> bool {
        matches!(self, AcquisitionStatus::AcquiredCore | AcquisitionStatus::Enqueued)
    }
}

/// Order in which admission attempts are made across the two devices.
///
/// | Mode | `CpuOrGpu` attempt order |
/// |------|--------------------------|
/// | `Default` | core(primary), core(secondary), queue(primary), queue(secondary) |
/// | `PrimarySecondary` | core(primary), queue(primary), core(secondary), queue(secondary) |
/// | `NoQueue` | core(primary), core(secondary) |
///
/// Single-device policies only ever touch the primary device. `Default`
/// spreads load by exhausting free cores on both devices before any
/// queuing; `PrimarySecondary` fills the preferred device (queue included)
/// before overflowing; `NoQueue` fails fast so the caller's retry loop
/// becomes the only waiting mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    Default,
    PrimarySecondary,
    NoQueue,
}

impl AcquisitionMode {
    /// Parses the numeric CLI encoding (0/1/2).
    pub fn from_index(index: u32) -> Result<Self, PipelineError> {
        match index {
            0 => Ok(AcquisitionMode::Default),
            1 => Ok(AcquisitionMode::PrimarySecondary),
            2 => Ok(AcquisitionMode::NoQueue),
            other => Err(PipelineError::invalid_config(format!(
                "acquisition mode must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }

    /// Whether queued (blocking) acquisition is permitted in this mode.
    pub fn queue_enabled(self) -> bool {
        !matches!(self, AcquisitionMode::NoQueue)
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionMode::Default => "default",
            AcquisitionMode::PrimarySecondary => "primary-secondary",
            AcquisitionMode::NoQueue => "no-queue",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admitted_statuses_owe_a_release() {
        assert!(AcquisitionStatus::AcquiredCore.is_admitted());
        assert!(AcquisitionStatus::Enqueued.is_admitted());
        assert!(!AcquisitionStatus::Failed.is_admitted());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AcquisitionMode::from_index(0).unwrap(), AcquisitionMode::Default);
        assert_eq!(AcquisitionMode::from_index(1).unwrap(), AcquisitionMode::PrimarySecondary);
        assert_eq!(AcquisitionMode::from_index(2).unwrap(), AcquisitionMode::NoQueue);
        assert!(AcquisitionMode::from_index(3).is_err());
    }

    #[test]
    fn test_queue_enabled() {
        assert!(AcquisitionMode::Default.queue_enabled());
        assert!(AcquisitionMode::PrimarySecondary.queue_enabled());
        assert!(!AcquisitionMode::NoQueue.queue_enabled());
    }
}
