// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Hybrid Pipeline
//!
//! A heterogeneous CPU/GPU streaming pipeline over image frames. Frames
//! flow through a fixed sequence of stages; every stage of every frame is
//! dispatched to the CPU worker pool or the GPU accelerator by a runtime
//! admission-control layer, under one of six interchangeable engine
//! topologies, and an optional auto-tuner reshapes the whole configuration
//! once it has sampled both devices.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  application    engines · dispatcher · path selector ·       │
//! │                 auto-tuner · settings · summary               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  infrastructure  stage/device admission units · resources    │
//! │                  manager · frame ring · device queues ·      │
//! │                  stage kernels · logging · JSON reports      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  hybrid_pipeline_domain   frames · metrics · policies ·      │
//! │                           queueing model · planner           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dispatch Path
//!
//! ```text
//! input ─▶ frame ring ─▶ [per stage] path select ─▶ admit (manager →
//! device → stage unit) ─▶ dispatch (kernel, timing, traces) ─▶ release
//! ─▶ next stage ─▶ output (fold metrics, maybe auto-tune, recycle)
//! ```
//!
//! The admission layer is two-level: a per-stage unit bounds kernel
//! parallelism, a per-device unit bounds total in-flight work; both are
//! FIFO-fair with bounded wait queues and a status-typed protocol
//! (`AcquiredCore` / `Enqueued` / `Failed`).

pub mod application;
pub mod infrastructure;

pub use application::context::RunContext;
pub use application::engines::{execute, EngineKind};
pub use application::settings::RunSettings;
