// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # JSON Result Records
//!
//! Append-only persistence of run results: one JSON object per line, keyed
//! by the compound configuration string and a random per-run tag so
//! repeated runs of the same configuration stay distinguishable. The
//! record carries throughput, per-stage timings and filter counts; the
//! schema is consumed by external analysis tooling, this module only
//! supplies the numbers.

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use hybrid_pipeline_domain::PipelineError;

/// One persisted run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Random tag distinguishing runs of identical configuration.
    pub run_tag: String,
    /// Wall-clock timestamp of the record.
    pub timestamp: String,
    /// Engine name.
    pub engine: String,
    /// Compound configuration string (per-stage policies, `-A` suffix
    /// after an auto-tune).
    pub config: String,
    pub num_frames: usize,
    pub threads: usize,
    pub tokens: usize,
    pub total_time_ms: f64,
    pub throughput_fps: f64,
    /// Throughput during the sampling window, when the tuner ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_balance_fps: Option<f64>,
    /// Throughput after reconfiguration, when the tuner ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_system_fps: Option<f64>,
    /// The planner's predicted throughput, when the tuner ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_expected_fps: Option<f64>,
    pub frames_cpu: Vec<u64>,
    pub frames_gpu: Vec<u64>,
    pub time_cpu_ms: Vec<f64>,
    pub time_gpu_ms: Vec<f64>,
}

/// Generates the random per-run tag.
pub fn run_tag() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Current timestamp in RFC 3339.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Appends one record as a JSON line.
pub fn append_record(path: &Path, record: &ReportRecord) -> Result<(), PipelineError> {
    let line = serde_json::to_string(record)
        .map_err(|error| PipelineError::internal_error(format!("report serialization failed: {}", error)))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|error| PipelineError::internal_error(format!("cannot open report file: {}", error)))?;
    writeln!(file, "{}", line)
        .map_err(|error| PipelineError::internal_error(format!("cannot append report record: {}", error)))?;
    tracing::info!(path = %path.display(), tag = %record.run_tag, "report record appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ReportRecord {
        ReportRecord {
            run_tag: run_tag(),
            timestamp: timestamp(),
            engine: "bounded_parallel".to_string(),
            config: "111".to_string(),
            num_frames: 100,
            threads: 4,
            tokens: 4,
            total_time_ms: 123.4,
            throughput_fps: 810.4,
            throughput_balance_fps: None,
            throughput_system_fps: None,
            throughput_expected_fps: None,
            frames_cpu: vec![40, 50, 60],
            frames_gpu: vec![60, 50, 40],
            time_cpu_ms: vec![1.0, 2.0, 3.0],
            time_gpu_ms: vec![3.0, 2.0, 1.0],
        }
    }

    #[test]
    fn test_run_tags_are_random() {
        assert_ne!(run_tag(), run_tag());
        assert_eq!(run_tag().len(), 8);
    }

    #[test]
    fn test_records_append_as_json_lines() {
        let dir = std::env::temp_dir().join(format!("hybrid_report_{}", run_tag()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("report.jsonl");

        append_record(&path, &sample_record()).unwrap();
        append_record(&path, &sample_record()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: ReportRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.num_frames, 100);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
