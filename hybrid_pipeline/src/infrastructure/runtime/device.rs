// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Device Admission Unit
//!
//! Aggregates the stage units of one device and adds the device-wide
//! limits on top of them:
//!
//! - a **core cap**: the sum of admitted work across all stages never
//!   exceeds the device's total cores, even when individual stage caps
//!   would allow more;
//! - a **queued-task cap**: at most [`DEFAULT_MAX_QUEUED_TASKS`] callers
//!   may sit in wait queues on one device, a backpressure knob that keeps
//!   in-flight work within memory and bandwidth limits.
//!
//! ## Two-Level Queued Admission
//!
//! A queued acquisition first waits in the *stage* FIFO (bounding kernel
//! parallelism), then in the *device* FIFO (bounding device occupancy).
//! Only after both grants does the caller own a core; release returns both
//! levels at once. Stage units are never entered while the device lock is
//! held during a blocking wait, so stage- and device-level waiters cannot
//! deadlock each other.
//!
//! ## Virtual Stage Remap
//!
//! Callers address stages by *virtual* index. A remap table translates to
//! the *actual* stage-unit arena slot, which lets the auto-tuner collapse
//! all virtual stages onto one shared unit or split them across a primary
//! and a helper unit without the engines noticing.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use hybrid_pipeline_domain::value_objects::{AcquisitionStatus, DeviceKind};
use hybrid_pipeline_domain::PipelineError;

use crate::infrastructure::runtime::stage_unit::StageUnit;

/// Device-wide bound on queued (waiting) acquisitions.
pub const DEFAULT_MAX_QUEUED_TASKS: usize = 16;

#[derive(Debug)]
struct DeviceState {
    stages: Vec<Option<Arc<StageUnit>>>,
    stage_map: HashMap<usize, usize>,
    total_cores: usize,
    used_cores: usize,
    total_queued: usize,
    next_ticket: u64,
    fifo: VecDeque<u64>,
    closed: bool,
}

/// Admission state for one device (CPU or GPU).
#[derive(Debug)]
pub struct DeviceUnit {
    kind: DeviceKind,
    max_queued_tasks: usize,
    state: Mutex<DeviceState>,
    available: Condvar,
}

impl DeviceUnit {
    /// Creates a device with `total_cores` cores and the default
    /// queued-task cap.
    pub fn new(kind: DeviceKind, total_cores: usize) -> Self {
        Self::with_queue_cap(kind, total_cores, DEFAULT_MAX_QUEUED_TASKS)
    }

    /// Creates a device with an explicit queued-task cap.
    pub fn with_queue_cap(kind: DeviceKind, total_cores: usize, max_queued_tasks: usize) -> Self {
        tracing::debug!(device = %kind, total_cores, max_queued_tasks, "device created");
        Self {
            kind,
            max_queued_tasks,
            state: Mutex::new(DeviceState {
                stages: Vec::new(),
                stage_map: HashMap::new(),
                total_cores,
                used_cores: 0,
                total_queued: 0,
                next_ticket: 0,
                fifo: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Accelerator kind of this device.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Installs (or replaces) the stage unit at arena slot `actual_id`.
    pub fn add_stage(&self, actual_id: usize, cores: usize, queue_size: usize) {
        let mut state = self.state.lock();
        if actual_id >= state.stages.len() {
            state.stages.resize_with(actual_id + 1, || None);
        }
        state.stages[actual_id] = Some(Arc::new(StageUnit::new(cores, queue_size)));
        tracing::debug!(device = %self.kind, actual_id, cores, queue_size, "stage added");
    }

    /// Removes the stage unit at arena slot `actual_id` and any identity
    /// mapping to it.
    pub fn remove_stage(&self, actual_id: usize) {
        let mut state = self.state.lock();
        if let Some(slot) = state.stages.get_mut(actual_id) {
            if let Some(unit) = slot.take() {
                unit.close();
            }
            state.stage_map.remove(&actual_id);
            tracing::debug!(device = %self.kind, actual_id, "stage removed");
        }
    }

    /// Maps one virtual stage index to an arena slot.
    pub fn map_stage(&self, virtual_id: usize, actual_id: usize) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if actual_id >= state.stages.len() || state.stages[actual_id].is_none() {
            return Err(PipelineError::invalid_config(format!(
                "cannot map virtual stage {} to missing stage unit {}",
                virtual_id, actual_id
            )));
        }
        state.stage_map.insert(virtual_id, actual_id);
        Ok(())
    }

    /// Replaces the whole remap table.
    pub fn update_mapping(&self, mapping: HashMap<usize, usize>) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        for (&virtual_id, &actual_id) in &mapping {
            if actual_id >= state.stages.len() || state.stages[actual_id].is_none() {
                return Err(PipelineError::invalid_config(format!(
                    "cannot map virtual stage {} to missing stage unit {}",
                    virtual_id, actual_id
                )));
            }
        }
        state.stage_map = mapping;
        Ok(())
    }

    /// Resolves a virtual stage to its unit.
    pub fn stage(&self, virtual_id: usize) -> Option<Arc<StageUnit>> {
        let state = self.state.lock();
        let actual_id = *state.stage_map.get(&virtual_id)?;
        state.stages.get(actual_id).and_then(Clone::clone)
    }

    /// Attempts a non-blocking core acquisition for a virtual stage.
    ///
    /// Succeeds only when the device has headroom *and* the stage unit
    /// grants a core.
    pub fn acquire_core(&self, virtual_id: usize) -> AcquisitionStatus {
        let Some(stage) = self.stage(virtual_id) else {
            tracing::trace!(device = %self.kind, virtual_id, "no stage mapped");
            return AcquisitionStatus::Failed;
        };

        let mut state = self.state.lock();
        if state.closed || state.total_cores == 0 {
            return AcquisitionStatus::Failed;
        }
        if state.used_cores < state.total_cores && stage.try_acquire_core() == AcquisitionStatus::AcquiredCore {
            state.used_cores += 1;
            tracing::trace!(
                device = %self.kind,
                virtual_id,
                used = state.used_cores,
                total = state.total_cores,
                "device core acquired"
            );
            return AcquisitionStatus::AcquiredCore;
        }
        AcquisitionStatus::Failed
    }

    /// Queued acquisition for a virtual stage: waits in the stage FIFO,
    /// then in the device FIFO, and returns holding a core at both levels.
    pub fn acquire_queue(&self, virtual_id: usize) -> AcquisitionStatus {
        let Some(stage) = self.stage(virtual_id) else {
            return AcquisitionStatus::Failed;
        };

        {
            let state = self.state.lock();
            if state.closed || state.total_cores == 0 || self.max_queued_tasks == 0 {
                return AcquisitionStatus::Failed;
            }
            if state.total_queued >= self.max_queued_tasks {
                tracing::trace!(
                    device = %self.kind,
                    queued = state.total_queued,
                    cap = self.max_queued_tasks,
                    "device saturated with queued tasks"
                );
                return AcquisitionStatus::Failed;
            }
        }

        // Stage-level admission first; blocks without holding the device
        // lock. On success the caller holds a stage core.
        if stage.acquire_via_queue() != AcquisitionStatus::Enqueued {
            return AcquisitionStatus::Failed;
        }

        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.total_queued += 1;
        state.fifo.push_back(ticket);

        loop {
            if state.closed {
                if let Some(position) = state.fifo.iter().position(|&t| t == ticket) {
                    state.fifo.remove(position);
                }
                state.total_queued -= 1;
                drop(state);
                // Hand back the stage core taken above.
                stage.release();
                return AcquisitionStatus::Failed;
            }
            let at_front = state.fifo.front() == Some(&ticket);
            if at_front && state.used_cores < state.total_cores {
                state.used_cores += 1;
                state.total_queued -= 1;
                state.fifo.pop_front();
                tracing::trace!(
                    device = %self.kind,
                    virtual_id,
                    used = state.used_cores,
                    total = state.total_cores,
                    "device core acquired after wait"
                );
                self.available.notify_all();
                return AcquisitionStatus::Enqueued;
            }
            self.available.wait(&mut state);
        }
    }

    /// Releases one core of a virtual stage at both levels.
    ///
    /// # Panics
    ///
    /// Underflow of the device counter aborts; it means an engine broke
    /// the one-acquire-one-release discipline.
    pub fn release(&self, virtual_id: usize) {
        let Some(stage) = self.stage(virtual_id) else {
            tracing::warn!(device = %self.kind, virtual_id, "release for unmapped stage ignored");
            return;
        };
        let mut state = self.state.lock();
        assert!(
            state.used_cores > 0,
            "device core released without a matching acquire"
        );
        stage.release();
        state.used_cores -= 1;
        drop(state);
        self.available.notify_all();
    }

    /// Cancels all waiters at both levels and refuses future admissions.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let stages: Vec<_> = state.stages.iter().flatten().cloned().collect();
        drop(state);
        for stage in stages {
            stage.close();
        }
        self.available.notify_all();
    }

    /// Device-wide cores currently held.
    pub fn used_cores(&self) -> usize {
        self.state.lock().used_cores
    }

    /// Device-wide core cap.
    pub fn total_cores(&self) -> usize {
        self.state.lock().total_cores
    }

    /// Callers currently waiting in queues on this device.
    pub fn total_queued(&self) -> usize {
        self.state.lock().total_queued
    }

    /// Queue length of one virtual stage.
    pub fn queue_len(&self, virtual_id: usize) -> usize {
        self.stage(virtual_id).map(|stage| stage.queue_len()).unwrap_or(0)
    }

    /// FIFO bound of one virtual stage.
    pub fn max_queue(&self, virtual_id: usize) -> usize {
        self.stage(virtual_id).map(|stage| stage.max_queue()).unwrap_or(0)
    }

    /// Number of arena slots (some may be empty).
    pub fn arena_len(&self) -> usize {
        self.state.lock().stages.len()
    }
}
