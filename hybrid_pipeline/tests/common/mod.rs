// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared helpers for the integration suite: build a run context from CLI
//! arguments, shrunk to a tiny frame geometry so scenarios stay fast.

use clap::Parser;
use std::sync::Arc;

use hybrid_pipeline::application::context::RunContext;
use hybrid_pipeline::application::settings::RunSettings;
use hybrid_pipeline_bootstrap::cli::{validate, Cli};
use hybrid_pipeline_domain::value_objects::ImageGeometry;

/// Builds a run context from CLI-style arguments with a small test
/// geometry (the scenarios use workload kernels, so buffer contents never
/// matter - only allocation size does).
pub fn build_context(args: &[&str]) -> Arc<RunContext> {
    let mut full = vec!["hybrid_pipeline"];
    full.extend_from_slice(args);
    let cli = validate(Cli::parse_from(full)).expect("arguments should validate");
    let mut settings = RunSettings::from_cli(&cli).expect("settings should bind");
    settings.geometry = ImageGeometry::with_frame(32, 24);
    RunContext::new(settings).expect("context should assemble")
}
