// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Coupling Mode
//!
//! Controls *when* the device choice for a frame is made:
//!
//! - **Coupled** - the path selector consults the resources manager at
//!   every stage, so a single frame may hop between CPU and GPU.
//! - **Decoupled** - one decision at pipeline entry, before the first
//!   stage; the frame is marked and all of its stages replay that device
//!   without touching admission again.
//! - **CoupledCustom** - coupled consultation with a user-supplied
//!   per-stage priority vector instead of the default preference.
//!
//! The auto-tuner may switch a running pipeline from coupled to decoupled
//! when the all-GPU configuration wins (both paths then run in parallel).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame/device binding discipline for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouplingMode {
    /// Device chosen per stage, per frame.
    Coupled,
    /// Device chosen once at pipeline entry and kept for every stage.
    Decoupled,
    /// Coupled, with explicit per-stage device priorities.
    CoupledCustom,
}

impl CouplingMode {
    /// Whether the device decision is made once at pipeline entry.
    pub fn decides_at_entry(self) -> bool {
        matches!(self, CouplingMode::Decoupled)
    }
}

impl fmt::Display for CouplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CouplingMode::Coupled => "coupled",
            CouplingMode::Decoupled => "decoupled",
            CouplingMode::CoupledCustom => "coupled-custom",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_decision() {
        assert!(CouplingMode::Decoupled.decides_at_entry());
        assert!(!CouplingMode::Coupled.decides_at_entry());
        assert!(!CouplingMode::CoupledCustom.decides_at_entry());
    }
}
