// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Hybrid Pipeline Bootstrap
//!
//! Entry-point support for the hybrid pipeline binary: command-line
//! parsing with structural validation, and platform probing. This crate
//! deliberately knows nothing about the domain - it hands the application
//! layer a range-checked [`cli::ValidatedCli`] and lets it bind stage
//! policies, device priorities, and geometry itself.

pub mod cli;
pub mod platform;

pub use cli::{parse_and_validate, Cli, ParseError, ValidatedCli, ENGINE_NAMES};
pub use platform::{available_cpu_cores, default_worker_count};
