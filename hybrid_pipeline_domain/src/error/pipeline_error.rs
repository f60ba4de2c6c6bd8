// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Error Types
//!
//! This module defines the error taxonomy for the hybrid dispatch system.
//! Each variant corresponds to a failure class with a distinct recovery
//! policy:
//!
//! | Variant | Condition | Policy |
//! |---------|-----------|--------|
//! | `InvalidConfiguration` | Bad CLI combination, malformed policy string | Fail fast at startup |
//! | `ResourceExhausted` | All admission attempts failed | Recovered locally by retry |
//! | `ProcessingFailed` | A stage kernel signalled failure | Terminate the run, emit partial metrics |
//! | `InvariantViolation` | Core counter underflow, FIFO corruption | Abort - scheduler bug |
//! | `TimeoutError` | A bounded wait expired | Retry-able |
//! | `Cancelled` | Admission unit closed while waiting | Observed by queued waiters |
//! | `InternalError` | Anything that "cannot happen" | Abort |
//!
//! ## Design Principles
//!
//! - **Specific**: Each error type represents a specific failure mode
//! - **Actionable**: Error messages provide enough context for debugging
//! - **Cloneable**: Errors can be logged and aggregated without ceremony
//!
//! Admission failures are deliberately *not* errors on the hot path: the
//! path selector retries with a cooperative yield until a device admits the
//! frame, so `ResourceExhausted` only surfaces from non-retrying callers.

use thiserror::Error;

/// Domain-specific errors for the hybrid pipeline system.
///
/// This enum represents all possible errors that can occur within the
/// domain layer. Each variant includes a descriptive message designed to
/// state what went wrong and, where possible, how to fix it.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new processing error
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Creates a new resource exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Creates a new invariant violation error
    pub fn invariant_violation(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is recoverable
    ///
    /// Recoverable errors indicate transient conditions that a caller may
    /// retry. Invariant violations and internal errors are never
    /// recoverable: they indicate a scheduler bug and the process should
    /// abort rather than limp on with corrupted admission counters.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ResourceExhausted(_) | PipelineError::TimeoutError(_) | PipelineError::Cancelled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = PipelineError::invalid_config("both numframes and duration given");
        assert_eq!(err.to_string(), "Invalid configuration: both numframes and duration given");

        let err = PipelineError::invariant_violation("used_cores underflow");
        assert_eq!(err.to_string(), "Invariant violation: used_cores underflow");
    }

    #[test]
    fn test_recoverability_classification() {
        assert!(PipelineError::resource_exhausted("no cores").is_recoverable());
        assert!(PipelineError::cancelled("unit closed").is_recoverable());
        assert!(!PipelineError::invariant_violation("underflow").is_recoverable());
        assert!(!PipelineError::invalid_config("bad config").is_recoverable());
        assert!(!PipelineError::internal_error("oops").is_recoverable());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = PipelineError::processing_failed("kernel panicked");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
