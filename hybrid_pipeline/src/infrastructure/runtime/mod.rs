// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Resource Governance
//!
//! The two-level admission layer and the frame pool:
//!
//! - [`stage_unit`] - per-stage bounded cores + bounded wait FIFO (level 1)
//! - [`device`] - per-device aggregation, core cap, queued-task cap,
//!   virtual stage remap (level 2)
//! - [`resource_manager`] - routes acquisitions across the two devices
//!   under the configured acquisition mode
//! - [`frame_ring`] - fixed pool of reusable frames

pub mod device;
pub mod frame_ring;
pub mod resource_manager;
pub mod stage_unit;

pub use device::{DeviceUnit, DEFAULT_MAX_QUEUED_TASKS};
pub use frame_ring::FrameRing;
pub use resource_manager::{spawn_monitor, Grant, MonitorHandle, ResourceManager};
pub use stage_unit::StageUnit;
