// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Admission Unit
//!
//! Bounded cores plus a bounded FIFO wait queue for one stage on one
//! device. This is the innermost of the two admission levels: it caps the
//! parallelism of a single kernel (which has a finite speed-up) while the
//! device unit above it caps total in-flight work on the device.
//!
//! ## Protocol
//!
//! - [`StageUnit::try_acquire_core`] - non-blocking; succeeds only when a
//!   core is free.
//! - [`StageUnit::acquire_via_queue`] - joins the wait FIFO if a slot is
//!   free and *blocks* until the caller is at the front of the FIFO **and**
//!   a core is available. Fails immediately when the FIFO is full or the
//!   unit cannot admit anyone (`total_cores == 0` or `max_queue == 0`).
//! - [`StageUnit::release`] - returns a core and wakes every waiter so the
//!   new front can re-check its predicate.
//!
//! ## Fairness
//!
//! Waiters draw a monotonic ticket on entry; a waiter only claims a core
//! when its ticket is at the FIFO front, so an earlier waiter is never
//! overtaken by a later one, spurious wakeups included. `used_cores`
//! changes and FIFO mutations happen under one lock - a single logical
//! transaction.
//!
//! ## Reconfiguration
//!
//! The auto-tuner resizes units through [`StageUnit::set_total_cores`] /
//! [`StageUnit::set_max_queue`]; both take the same lock as the acquire
//! paths and notify waiters so a grown unit drains its queue immediately.
//! [`StageUnit::close`] cancels all queued waiters, which then observe
//! `Failed`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

use hybrid_pipeline_domain::value_objects::AcquisitionStatus;

#[derive(Debug)]
struct StageState {
    total_cores: usize,
    used_cores: usize,
    max_queue: usize,
    next_ticket: u64,
    fifo: VecDeque<u64>,
    closed: bool,
}

/// Admission state for one stage on one device.
#[derive(Debug)]
pub struct StageUnit {
    state: Mutex<StageState>,
    available: Condvar,
}

impl StageUnit {
    /// Creates a unit with `total_cores` cores and a wait FIFO bounded by
    /// `max_queue`.
    pub fn new(total_cores: usize, max_queue: usize) -> Self {
        tracing::debug!(total_cores, max_queue, "stage unit created");
        Self {
            state: Mutex::new(StageState {
                total_cores,
                used_cores: 0,
                max_queue,
                next_ticket: 0,
                fifo: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Attempts to take a core without blocking.
    pub fn try_acquire_core(&self) -> AcquisitionStatus {
        let mut state = self.state.lock();
        if !state.closed && state.total_cores > 0 && state.used_cores < state.total_cores {
            state.used_cores += 1;
            tracing::trace!(used = state.used_cores, total = state.total_cores, "stage core acquired");
            AcquisitionStatus::AcquiredCore
        } else {
            AcquisitionStatus::Failed
        }
    }

    /// Joins the wait FIFO and blocks until admitted.
    ///
    /// Returns `Enqueued` once the caller holds a core, or `Failed` when
    /// the unit cannot queue (no cores configured, queuing disabled, FIFO
    /// full) or is closed while the caller waits.
    pub fn acquire_via_queue(&self) -> AcquisitionStatus {
        let mut state = self.state.lock();
        if state.closed || state.total_cores == 0 || state.max_queue == 0 {
            return AcquisitionStatus::Failed;
        }
        if state.fifo.len() >= state.max_queue {
            tracing::trace!(queued = state.fifo.len(), max = state.max_queue, "stage queue full");
            return AcquisitionStatus::Failed;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.fifo.push_back(ticket);

        loop {
            if state.closed {
                // Cancelled while waiting; withdraw the ticket.
                if let Some(position) = state.fifo.iter().position(|&t| t == ticket) {
                    state.fifo.remove(position);
                }
                return AcquisitionStatus::Failed;
            }
            let at_front = state.fifo.front() == Some(&ticket);
            if at_front && state.used_cores < state.total_cores {
                state.used_cores += 1;
                state.fifo.pop_front();
                tracing::trace!(
                    used = state.used_cores,
                    total = state.total_cores,
                    "stage core acquired after wait"
                );
                // The next waiter may also be admissible.
                self.available.notify_all();
                return AcquisitionStatus::Enqueued;
            }
            self.available.wait(&mut state);
        }
    }

    /// Returns a core and wakes all waiters.
    ///
    /// A release against an idle unit is logged and ignored rather than
    /// treated as fatal: after the auto-tuner rewrites the virtual remap,
    /// a release that raced the reconfiguration can resolve to a
    /// different unit than its acquire. The device-level counter still
    /// asserts, so a genuine double release is caught there.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.used_cores == 0 {
            tracing::warn!("stage core released while idle (remapped during reconfiguration?)");
            return;
        }
        state.used_cores -= 1;
        drop(state);
        self.available.notify_all();
    }

    /// Cancels every queued waiter and refuses future admissions.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    /// Resizes the core pool. Waiters are notified so a grown pool drains
    /// the FIFO without an extra release.
    pub fn set_total_cores(&self, total_cores: usize) {
        let mut state = self.state.lock();
        state.total_cores = total_cores;
        tracing::debug!(total_cores, "stage total cores updated");
        drop(state);
        self.available.notify_all();
    }

    /// Resizes the wait FIFO bound. Does not evict current waiters.
    pub fn set_max_queue(&self, max_queue: usize) {
        let mut state = self.state.lock();
        state.max_queue = max_queue;
        tracing::debug!(max_queue, "stage max queue updated");
        drop(state);
        self.available.notify_all();
    }

    /// Cores currently held.
    pub fn used_cores(&self) -> usize {
        self.state.lock().used_cores
    }

    /// Configured core count.
    pub fn total_cores(&self) -> usize {
        self.state.lock().total_cores
    }

    /// Waiters currently queued.
    pub fn queue_len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    /// Configured FIFO bound.
    pub fn max_queue(&self) -> usize {
        self.state.lock().max_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_core_acquisition_exhausts() {
        let unit = StageUnit::new(2, 4);
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::Failed);
        unit.release();
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);
    }

    #[test]
    fn test_zero_core_unit_never_admits() {
        let unit = StageUnit::new(0, 4);
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::Failed);
        assert_eq!(unit.acquire_via_queue(), AcquisitionStatus::Failed);
    }

    #[test]
    fn test_zero_queue_disables_queuing() {
        let unit = StageUnit::new(1, 0);
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);
        assert_eq!(unit.acquire_via_queue(), AcquisitionStatus::Failed);
    }

    #[test]
    fn test_full_fifo_fails_immediately() {
        let unit = Arc::new(StageUnit::new(1, 1));
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);

        // One waiter occupies the only FIFO slot.
        let waiter = Arc::clone(&unit);
        let join = thread::spawn(move || waiter.acquire_via_queue());
        while unit.queue_len() == 0 {
            thread::yield_now();
        }

        assert_eq!(unit.acquire_via_queue(), AcquisitionStatus::Failed);

        unit.release();
        assert_eq!(join.join().unwrap(), AcquisitionStatus::Enqueued);
        unit.release();
    }

    #[test]
    fn test_fifo_order_is_preserved() {
        let unit = Arc::new(StageUnit::new(1, 8));
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);

        let admitted = Arc::new(Mutex::new(Vec::new()));
        let mut joins = Vec::new();
        for waiter_id in 0..4 {
            let unit_for_thread = Arc::clone(&unit);
            let admitted = Arc::clone(&admitted);
            joins.push(thread::spawn(move || {
                let status = unit_for_thread.acquire_via_queue();
                assert_eq!(status, AcquisitionStatus::Enqueued);
                admitted.lock().push(waiter_id);
                unit_for_thread.release();
            }));
            // Serialize FIFO entry so arrival order equals waiter id.
            while unit.queue_len() != waiter_id + 1 {
                thread::yield_now();
            }
        }

        unit.release();
        for join in joins {
            join.join().unwrap();
        }
        assert_eq!(*admitted.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_grow_cores_wakes_waiters() {
        let unit = Arc::new(StageUnit::new(1, 4));
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);

        let waiter = Arc::clone(&unit);
        let join = thread::spawn(move || waiter.acquire_via_queue());
        while unit.queue_len() == 0 {
            thread::yield_now();
        }

        unit.set_total_cores(2);
        assert_eq!(join.join().unwrap(), AcquisitionStatus::Enqueued);
        assert_eq!(unit.used_cores(), 2);
    }

    #[test]
    fn test_close_cancels_waiters() {
        let unit = Arc::new(StageUnit::new(1, 4));
        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);

        let waiter = Arc::clone(&unit);
        let join = thread::spawn(move || waiter.acquire_via_queue());
        while unit.queue_len() == 0 {
            thread::yield_now();
        }

        unit.close();
        assert_eq!(join.join().unwrap(), AcquisitionStatus::Failed);
        assert_eq!(unit.queue_len(), 0);
    }

    #[test]
    fn test_release_while_idle_is_ignored() {
        let unit = StageUnit::new(1, 1);
        unit.release();
        assert_eq!(unit.used_cores(), 0);

        assert_eq!(unit.try_acquire_core(), AcquisitionStatus::AcquiredCore);
        unit.release();
        assert_eq!(unit.used_cores(), 0);
    }

    #[test]
    fn test_capacity_invariant_under_contention() {
        let unit = Arc::new(StageUnit::new(3, 8));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut joins = Vec::new();

        for _ in 0..12 {
            let unit = Arc::clone(&unit);
            let peak = Arc::clone(&peak);
            joins.push(thread::spawn(move || {
                for _ in 0..50 {
                    let status = match unit.try_acquire_core() {
                        AcquisitionStatus::AcquiredCore => AcquisitionStatus::AcquiredCore,
                        _ => unit.acquire_via_queue(),
                    };
                    if status.is_admitted() {
                        let used = unit.used_cores();
                        peak.fetch_max(used, Ordering::Relaxed);
                        assert!(used <= 3);
                        thread::sleep(Duration::from_micros(50));
                        unit.release();
                    }
                }
            }));
        }
        for join in joins {
            join.join().unwrap();
        }
        assert!(peak.load(Ordering::Relaxed) <= 3);
        assert_eq!(unit.used_cores(), 0);
    }
}
