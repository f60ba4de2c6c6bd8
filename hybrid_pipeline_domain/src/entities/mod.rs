// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entities
//!
//! Domain entities with identity and lifecycle: the frame that flows
//! through the pipeline, the completion handle a device submission returns,
//! and the metric accumulators the run reports from.

pub mod completion_handle;
pub mod frame;
pub mod processing_metrics;

pub use completion_handle::{CompletionHandle, ExecutionProfile};
pub use frame::{Frame, FrameBuffers};
pub use processing_metrics::StageMetrics;
