// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Layer
//!
//! Everything that touches threads, clocks, or files: the admission units
//! and resource manager, the frame ring, the device submission backends,
//! the stage kernels, logging, and result persistence.

pub mod device;
pub mod export;
pub mod logging;
pub mod runtime;
pub mod stages;
