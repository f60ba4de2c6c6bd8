// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Device Execution Backends
//!
//! Submission queues that turn kernel closures into completion handles.
//! This is the capability layer the event-chained and async-graph engines
//! are built on.

pub mod submission;

pub use submission::{DeviceQueues, SubmissionQueue};
