// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Binary entry point: parse and validate the CLI, bind settings, build
//! the run context, execute the chosen engine, and report.

use anyhow::{Context, Result};

use hybrid_pipeline::application::{engines, results};
use hybrid_pipeline::application::context::RunContext;
use hybrid_pipeline::application::settings::RunSettings;
use hybrid_pipeline::infrastructure::export;
use hybrid_pipeline::infrastructure::logging;

fn main() -> Result<()> {
    let cli = match hybrid_pipeline_bootstrap::parse_and_validate() {
        Ok(cli) => cli,
        Err(error) => {
            eprintln!("error: {}", error);
            std::process::exit(2);
        }
    };
    logging::init_logging(cli.verbose);

    let settings = RunSettings::from_cli(&cli).context("invalid run configuration")?;
    tracing::info!(
        engine = %settings.engine,
        config = %settings.config_label,
        threads = settings.threads,
        tokens = settings.tokens,
        ring = settings.ring_capacity,
        "run configured"
    );

    let ctx = RunContext::new(settings).context("failed to assemble run context")?;
    engines::execute(&ctx).context("pipeline run failed")?;

    let summary = results::summarize(&ctx);
    if let Some(path) = &ctx.settings.report_path {
        let record = results::report_record(&ctx, &summary);
        export::append_record(path, &record).context("failed to append report record")?;
    }

    Ok(())
}
