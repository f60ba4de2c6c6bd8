// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. Cli::parse()                    │  Parse CLI with clap
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  2. validate()                      │  Structural validation
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  3. ValidatedCli                    │  Range-checked arguments
//! └─────────────────────────────────────┘
//! ```
//!
//! Validation here is purely structural: ranges, mutual exclusion, and
//! vector arities. Binding the arguments to domain types (stage policies,
//! device priorities, image geometry) happens in the application layer, so
//! this crate stays free of domain dependencies.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while validating command-line arguments.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for --{arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("conflicting arguments: {0}")]
    Conflict(String),

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Hybrid CPU/GPU streaming pipeline over synthetic image frames.
#[derive(Debug, Parser)]
#[command(name = "hybrid_pipeline", version, about)]
pub struct Cli {
    /// Pipeline engine to run
    #[arg(long, default_value = "bounded_parallel")]
    pub api: String,

    /// Number of frames to process (exclusive with --duration)
    #[arg(long)]
    pub numframes: Option<usize>,

    /// Wall-clock budget, e.g. "30s", "2m", "1h 15m 10s" (exclusive with --numframes)
    #[arg(long)]
    pub duration: Option<String>,

    /// Number of CPU worker cores
    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    /// Image resolution preset (0: 720p .. 5: 4320p)
    #[arg(long, default_value_t = 1)]
    pub resolution: u32,

    /// In-flight frames (tokens)
    #[arg(long)]
    pub iff: Option<usize>,

    /// Per-stage policy string: 0 = CPU, 1 = CPU+GPU, 2 = GPU
    #[arg(long, default_value = "000")]
    pub config: String,

    /// Frame ring capacity (defaults to 8x the in-flight frames)
    #[arg(long)]
    pub buffersize: Option<usize>,

    /// Per-stage CPU wait-queue depth (1 value or one per stage)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub sizecpu: Option<Vec<usize>>,

    /// Per-stage GPU wait-queue depth (1 value or one per stage)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub sizegpu: Option<Vec<usize>>,

    /// Per-stage CPU core counts (1 value or one per stage)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub corescpu: Option<Vec<usize>>,

    /// Per-stage GPU core counts (1 value or one per stage)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub coresgpu: Option<Vec<usize>>,

    /// Preferred device per stage: 0 = CPU, 2 = GPU (1 value or one per stage)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub prefdevice: Option<Vec<u32>>,

    /// Acquisition mode: 0 = default, 1 = primary-secondary, 2 = no-queue
    #[arg(long, default_value_t = 0)]
    pub acqmode: u32,

    /// Enable the auto-tuner (one-shot reconfiguration after sampling)
    #[arg(long)]
    pub auto: bool,

    /// Auto-tuner sampling window, e.g. "10s"
    #[arg(long)]
    pub timesampling: Option<String>,

    /// Chain completion handles between stages of the serial engine
    #[arg(long)]
    pub dependson: bool,

    /// Synthetic CPU throughput per stage in frames/s (enables workload simulation)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub thcpu: Option<Vec<f64>>,

    /// Synthetic GPU throughput per stage in frames/s (enables workload simulation)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub thgpu: Option<Vec<f64>>,

    /// Append a JSON result record to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Command-line arguments after structural validation.
///
/// Per-stage vectors keep their CLI arity (one value or one per stage);
/// broadcasting a single value over all stages is the application layer's
/// job because the stage count is bound there.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub api: String,
    pub numframes: Option<usize>,
    pub duration: Option<Duration>,
    pub threads: usize,
    pub resolution: u32,
    pub iff: Option<usize>,
    pub config: String,
    pub buffersize: Option<usize>,
    pub sizecpu: Option<Vec<usize>>,
    pub sizegpu: Option<Vec<usize>>,
    pub corescpu: Option<Vec<usize>>,
    pub coresgpu: Option<Vec<usize>>,
    pub prefdevice: Option<Vec<u32>>,
    pub acqmode: u32,
    pub auto: bool,
    pub timesampling: Option<Duration>,
    pub dependson: bool,
    pub thcpu: Option<Vec<f64>>,
    pub thgpu: Option<Vec<f64>>,
    pub report: Option<PathBuf>,
    pub verbose: u8,
}

/// Known engine names, used both for validation and for help text.
pub const ENGINE_NAMES: &[&str] = &[
    "serial",
    "bounded_parallel",
    "graph_functional",
    "graph_async",
    "event_chain",
    "scalable",
];

/// Parse and validate CLI arguments from the process environment.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    validate(Cli::parse())
}

/// Validate parsed CLI arguments.
pub fn validate(cli: Cli) -> Result<ValidatedCli, ParseError> {
    if !ENGINE_NAMES.contains(&cli.api.as_str()) {
        return Err(ParseError::InvalidValue {
            arg: "api".to_string(),
            reason: format!("unknown engine '{}', expected one of {:?}", cli.api, ENGINE_NAMES),
        });
    }

    if cli.numframes.is_some() && cli.duration.is_some() {
        return Err(ParseError::Conflict(
            "--numframes and --duration are mutually exclusive".to_string(),
        ));
    }

    if let Some(frames) = cli.numframes {
        if frames == 0 {
            return Err(ParseError::InvalidValue {
                arg: "numframes".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
    }

    if cli.threads == 0 {
        return Err(ParseError::InvalidValue {
            arg: "threads".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if cli.resolution > 5 {
        return Err(ParseError::InvalidValue {
            arg: "resolution".to_string(),
            reason: "preset must be in 0..=5".to_string(),
        });
    }

    if let Some(iff) = cli.iff {
        if iff == 0 {
            return Err(ParseError::InvalidValue {
                arg: "iff".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(buffersize) = cli.buffersize {
            if buffersize < iff {
                return Err(ParseError::InvalidValue {
                    arg: "buffersize".to_string(),
                    reason: format!("ring capacity {} is below the in-flight frame count {}", buffersize, iff),
                });
            }
        }
    }

    if cli.config.is_empty() {
        return Err(ParseError::InvalidValue {
            arg: "config".to_string(),
            reason: "policy string must not be empty".to_string(),
        });
    }

    if cli.acqmode > 2 {
        return Err(ParseError::InvalidValue {
            arg: "acqmode".to_string(),
            reason: "must be 0, 1 or 2".to_string(),
        });
    }

    if let Some(priorities) = &cli.prefdevice {
        if priorities.iter().any(|digit| *digit != 0 && *digit != 2) {
            return Err(ParseError::InvalidValue {
                arg: "prefdevice".to_string(),
                reason: "entries must be 0 (CPU) or 2 (GPU)".to_string(),
            });
        }
    }

    for (name, rates) in [("thcpu", &cli.thcpu), ("thgpu", &cli.thgpu)] {
        if let Some(rates) = rates {
            if rates.iter().any(|rate| !rate.is_finite() || *rate <= 0.0) {
                return Err(ParseError::InvalidValue {
                    arg: name.to_string(),
                    reason: "throughputs must be positive".to_string(),
                });
            }
        }
    }

    let duration = cli.duration.as_deref().map(parse_duration).transpose()?;
    if let Some(duration) = duration {
        if duration < Duration::from_secs(1) {
            return Err(ParseError::InvalidValue {
                arg: "duration".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
    }
    let timesampling = cli.timesampling.as_deref().map(parse_duration).transpose()?;

    Ok(ValidatedCli {
        api: cli.api,
        numframes: cli.numframes,
        duration,
        threads: cli.threads,
        resolution: cli.resolution,
        iff: cli.iff,
        config: cli.config,
        buffersize: cli.buffersize,
        sizecpu: cli.sizecpu,
        sizegpu: cli.sizegpu,
        corescpu: cli.corescpu,
        coresgpu: cli.coresgpu,
        prefdevice: cli.prefdevice,
        acqmode: cli.acqmode,
        auto: cli.auto,
        timesampling,
        dependson: cli.dependson,
        thcpu: cli.thcpu,
        thgpu: cli.thgpu,
        report: cli.report,
        verbose: cli.verbose,
    })
}

/// Parses durations written as space-separated `<n><unit>` tokens with
/// units `h`, `m`, `s`, e.g. `"1h 30m"`, `"45s"`, or a bare second count
/// like `"90"`.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::InvalidDuration {
            input: input.to_string(),
            reason: "empty duration".to_string(),
        });
    }

    let mut total = Duration::ZERO;
    for token in trimmed.split_whitespace() {
        let (digits, unit) = match token.find(|c: char| !c.is_ascii_digit()) {
            Some(split) => token.split_at(split),
            None => (token, "s"),
        };
        let value: u64 = digits.parse().map_err(|_| ParseError::InvalidDuration {
            input: input.to_string(),
            reason: format!("'{}' is not a number", token),
        })?;
        let seconds = match unit {
            "s" => value,
            "m" => value * 60,
            "h" => value * 3600,
            other => {
                return Err(ParseError::InvalidDuration {
                    input: input.to_string(),
                    reason: format!("unknown unit '{}' (expected h, m or s)", other),
                })
            }
        };
        total += Duration::from_secs(seconds);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["hybrid_pipeline"])
    }

    #[test]
    fn test_defaults_validate() {
        let validated = validate(base_cli()).unwrap();
        assert_eq!(validated.api, "bounded_parallel");
        assert_eq!(validated.threads, 8);
        assert_eq!(validated.config, "000");
        assert!(validated.numframes.is_none());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let mut cli = base_cli();
        cli.api = "warp_drive".to_string();
        assert!(matches!(validate(cli), Err(ParseError::InvalidValue { .. })));
    }

    #[test]
    fn test_numframes_duration_conflict() {
        let mut cli = base_cli();
        cli.numframes = Some(100);
        cli.duration = Some("10s".to_string());
        assert!(matches!(validate(cli), Err(ParseError::Conflict(_))));
    }

    #[test]
    fn test_buffersize_below_iff_rejected() {
        let mut cli = base_cli();
        cli.iff = Some(8);
        cli.buffersize = Some(4);
        assert!(validate(cli).is_err());
    }

    #[test]
    fn test_prefdevice_digits_checked() {
        let mut cli = base_cli();
        cli.prefdevice = Some(vec![0, 1, 2]);
        assert!(validate(cli).is_err());

        let mut cli = base_cli();
        cli.prefdevice = Some(vec![0, 2, 2]);
        assert!(validate(cli).is_ok());
    }

    #[test]
    fn test_sub_second_duration_rejected() {
        let mut cli = base_cli();
        cli.duration = Some("0s".to_string());
        assert!(validate(cli).is_err());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h 15m 10s").unwrap(), Duration::from_secs(4510));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }
}
