// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Hybrid Pipeline Domain
//!
//! Pure domain layer of the hybrid CPU/GPU streaming pipeline. This crate
//! holds the dispatch vocabulary, the frame entity, the metric
//! accumulators, and the closed queueing-network planner - everything the
//! system needs to *reason* about heterogeneous dispatch, with no threads,
//! no clocks being started, and no I/O.
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  hybrid_pipeline  (engines, admission units, devices)    │
//! │  hybrid_pipeline_bootstrap  (CLI, platform probing)      │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ depends on
//! ┌────────────────────────────▼─────────────────────────────┐
//! │  hybrid_pipeline_domain  (this crate)                    │
//! │  value objects · entities · errors · queueing model      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contents
//!
//! - [`value_objects`] - `DeviceKind`, `StagePolicy`, `CouplingMode`,
//!   acquisition protocol types, image geometry
//! - [`entities`] - `Frame` (the pipeline item), `CompletionHandle` (the
//!   device-event capability), `StageMetrics` (per-stage per-device
//!   accumulators)
//! - [`services`] - the M/M/c/K/K solver and the configuration planner
//!   the auto-tuner is built on
//! - [`error`] - the `PipelineError` taxonomy

pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

pub use error::PipelineError;
