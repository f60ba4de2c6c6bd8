// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Completion Handle
//!
//! An opaque, future-like handle returned by a device submission. Handles
//! are the capability that makes event-chained execution possible:
//!
//! - a later stage can **depend on** the handles of earlier stages (the
//!   device backend waits for them before starting the new work item);
//! - the dispatcher can **query profiling info** (`command_start` /
//!   `command_end`) once the work item completed, which the metric
//!   aggregator prefers over wall-clock measurements;
//! - an admission release can be **deferred** until the handle completes,
//!   so the core is returned atomically with kernel completion.
//!
//! Both the CPU and the GPU backend honour the same handle type. Handles
//! are cheap to clone (shared state behind an `Arc`) and may be waited on
//! from any thread.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──mark_started()──▶ Running ──mark_complete()──▶ Complete
//!                                │
//!                                └────mark_failed(msg)───▶ Failed
//! ```
//!
//! The `mark_*` transitions are driven by the device backend that owns the
//! submitted work item; consumers only ever `wait` and `profile`.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::PipelineError;

/// Execution phases of a submitted work item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Complete,
    Failed(String),
}

#[derive(Debug)]
struct EventState {
    phase: Phase,
    queued_at: Instant,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
}

#[derive(Debug)]
struct EventInner {
    state: Mutex<EventState>,
    done: Condvar,
}

/// Profiling information of a finished work item.
///
/// Mirrors the device-side command timestamps: `started_at` is when the
/// backend began executing the kernel, `completed_at` when it finished.
/// The span between the two excludes queue wait time.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionProfile {
    pub queued_at: Instant,
    pub started_at: Instant,
    pub completed_at: Instant,
}

impl ExecutionProfile {
    /// Kernel execution time in milliseconds (`command_end - command_start`).
    pub fn execution_ms(&self) -> f64 {
        self.completed_at.duration_since(self.started_at).as_secs_f64() * 1e3
    }

    /// Time spent queued before execution began, in milliseconds.
    pub fn queue_wait_ms(&self) -> f64 {
        self.started_at.duration_since(self.queued_at).as_secs_f64() * 1e3
    }
}

/// Shared handle to one submitted work item.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    inner: Arc<EventInner>,
}

impl CompletionHandle {
    /// Creates a handle in the `Pending` phase. Called by device backends
    /// when a work item is enqueued.
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    phase: Phase::Pending,
                    queued_at: Instant::now(),
                    started_at: None,
                    completed_at: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Creates an already-complete handle with explicit timestamps.
    ///
    /// Used by synchronous (inline) dispatch so that callers see a uniform
    /// handle regardless of whether the kernel ran inline or on a device
    /// queue.
    pub fn completed_between(started_at: Instant, completed_at: Instant) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    phase: Phase::Complete,
                    queued_at: started_at,
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Marks the work item as executing. Backend-only.
    pub fn mark_started(&self) {
        let mut state = self.inner.state.lock();
        state.started_at = Some(Instant::now());
        state.phase = Phase::Running;
    }

    /// Marks the work item as complete and wakes all waiters. Backend-only.
    pub fn mark_complete(&self) {
        let mut state = self.inner.state.lock();
        state.completed_at = Some(Instant::now());
        state.phase = Phase::Complete;
        drop(state);
        self.inner.done.notify_all();
    }

    /// Marks the work item as failed and wakes all waiters. Backend-only.
    pub fn mark_failed(&self, message: impl Into<String>) {
        let mut state = self.inner.state.lock();
        state.completed_at = Some(Instant::now());
        state.phase = Phase::Failed(message.into());
        drop(state);
        self.inner.done.notify_all();
    }

    /// Whether the work item has reached a terminal phase.
    pub fn is_settled(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Complete | Phase::Failed(_))
    }

    /// Blocks until the work item completes.
    ///
    /// Returns `ProcessingFailed` if the backend marked the item failed;
    /// the error carries the kernel's failure message.
    pub fn wait(&self) -> Result<(), PipelineError> {
        let mut state = self.inner.state.lock();
        while !matches!(state.phase, Phase::Complete | Phase::Failed(_)) {
            self.inner.done.wait(&mut state);
        }
        match &state.phase {
            Phase::Failed(message) => Err(PipelineError::processing_failed(message.clone())),
            _ => Ok(()),
        }
    }

    /// Blocks until completion or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), PipelineError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !matches!(state.phase, Phase::Complete | Phase::Failed(_)) {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return Err(PipelineError::TimeoutError(format!(
                    "work item not complete after {:?}",
                    timeout
                )));
            }
        }
        match &state.phase {
            Phase::Failed(message) => Err(PipelineError::processing_failed(message.clone())),
            _ => Ok(()),
        }
    }

    /// Profiling info, available once the item settled with timestamps.
    pub fn profile(&self) -> Option<ExecutionProfile> {
        let state = self.inner.state.lock();
        match (&state.phase, state.started_at, state.completed_at) {
            (Phase::Complete, Some(started_at), Some(completed_at)) => Some(ExecutionProfile {
                queued_at: state.queued_at,
                started_at,
                completed_at,
            }),
            _ => None,
        }
    }
}
