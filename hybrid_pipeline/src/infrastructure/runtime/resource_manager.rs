// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resources Manager
//!
//! Routes stage admissions across the two devices. Given a virtual stage,
//! its execution policy, and the preferred device, the manager walks an
//! ordered attempt table determined by the acquisition mode:
//!
//! | Mode | Policy | Attempts (first success wins) |
//! |------|--------|-------------------------------|
//! | `Default` | pinned | core(primary) → queue(primary) |
//! | `Default` | `CpuOrGpu` | core(primary) → core(secondary) → queue(primary) → queue(secondary) |
//! | `PrimarySecondary` | `CpuOrGpu` | core(primary) → queue(primary) → core(secondary) → queue(secondary) |
//! | `NoQueue` | any | core(primary) [→ core(secondary) if `CpuOrGpu`] |
//!
//! ## Last-Used-Device Rebalance
//!
//! For `CpuOrGpu` stages only, when the calling thread's previous
//! admission landed on the preferred device, primary and secondary are
//! swapped before the walk. Successive acquires from one thread therefore
//! alternate devices when both have capacity, which keeps the secondary
//! device warm instead of hammering the primary. The bias is keyed by
//! caller thread identity; callers should not rely on any stricter
//! interleaving than "not strictly primary-first".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use hybrid_pipeline_domain::value_objects::{AcquisitionMode, AcquisitionStatus, DeviceKind, StagePolicy};

use crate::infrastructure::runtime::device::DeviceUnit;

/// A successful admission: the status-typed outcome plus the device that
/// granted it. The holder owes exactly one
/// [`ResourceManager::release_for_stage`].
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    pub status: AcquisitionStatus,
    pub device: DeviceKind,
}

/// Two-device admission router.
#[derive(Debug, Default)]
pub struct ResourceManager {
    devices: Vec<Arc<DeviceUnit>>,
    last_used: Mutex<HashMap<ThreadId, DeviceKind>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device; at most one per kind, duplicates are ignored.
    pub fn add_device(&mut self, device: Arc<DeviceUnit>) {
        if self.device(device.kind()).is_some() {
            tracing::warn!(device = %device.kind(), "device already registered, ignoring");
            return;
        }
        tracing::debug!(device = %device.kind(), "device registered");
        self.devices.push(device);
    }

    /// Looks up the device of a kind.
    pub fn device(&self, kind: DeviceKind) -> Option<&Arc<DeviceUnit>> {
        self.devices.iter().find(|device| device.kind() == kind)
    }

    /// Whether no device currently holds any core.
    pub fn idle(&self) -> bool {
        self.devices.iter().all(|device| device.used_cores() == 0)
    }

    /// Cancels all waiters on every device.
    pub fn close(&self) {
        for device in &self.devices {
            device.close();
        }
    }

    /// Attempts to admit the caller for one stage under the given policy,
    /// preference, and acquisition mode. Returns `None` when every attempt
    /// failed; the caller is expected to retry with a yield.
    pub fn acquire_for_stage(
        &self,
        virtual_stage: usize,
        policy: StagePolicy,
        preferred: DeviceKind,
        mode: AcquisitionMode,
    ) -> Option<Grant> {
        let mut primary = self.device(preferred);
        let mut secondary = self.device(preferred.other());

        if policy == StagePolicy::CpuOrGpu {
            let last = self.last_used.lock().get(&thread::current().id()).copied();
            if last == Some(preferred) && primary.is_some() && secondary.is_some() {
                std::mem::swap(&mut primary, &mut secondary);
            }
        } else {
            secondary = None;
        }

        let queue_enabled = mode.queue_enabled();
        let grant = match mode {
            AcquisitionMode::Default | AcquisitionMode::NoQueue => self
                .try_core(primary, virtual_stage)
                .or_else(|| self.try_core(secondary, virtual_stage))
                .or_else(|| {
                    if queue_enabled {
                        self.try_queue(primary, virtual_stage)
                            .or_else(|| self.try_queue(secondary, virtual_stage))
                    } else {
                        None
                    }
                }),
            AcquisitionMode::PrimarySecondary => self
                .try_core(primary, virtual_stage)
                .or_else(|| self.try_queue(primary, virtual_stage))
                .or_else(|| self.try_core(secondary, virtual_stage))
                .or_else(|| self.try_queue(secondary, virtual_stage)),
        };

        if grant.is_none() {
            tracing::trace!(virtual_stage, %policy, "no resources available");
        }
        grant
    }

    /// Returns the core obtained by a prior grant.
    pub fn release_for_stage(&self, virtual_stage: usize, kind: DeviceKind) {
        if let Some(device) = self.device(kind) {
            device.release(virtual_stage);
        } else {
            tracing::warn!(virtual_stage, device = %kind, "release for unknown device ignored");
        }
    }

    fn try_core(&self, device: Option<&Arc<DeviceUnit>>, virtual_stage: usize) -> Option<Grant> {
        let device = device?;
        if device.total_cores() == 0 {
            return None;
        }
        if device.acquire_core(virtual_stage) == AcquisitionStatus::AcquiredCore {
            self.record_last_used(device.kind());
            return Some(Grant {
                status: AcquisitionStatus::AcquiredCore,
                device: device.kind(),
            });
        }
        None
    }

    fn try_queue(&self, device: Option<&Arc<DeviceUnit>>, virtual_stage: usize) -> Option<Grant> {
        let device = device?;
        if device.total_cores() == 0 || device.max_queue(virtual_stage) == 0 {
            return None;
        }
        if device.acquire_queue(virtual_stage) == AcquisitionStatus::Enqueued {
            self.record_last_used(device.kind());
            return Some(Grant {
                status: AcquisitionStatus::Enqueued,
                device: device.kind(),
            });
        }
        None
    }

    fn record_last_used(&self, kind: DeviceKind) {
        self.last_used.lock().insert(thread::current().id(), kind);
    }
}

/// Handle to the optional occupancy monitor thread.
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops the monitor and joins its thread.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns a thread that logs per-device occupancy once a second at debug
/// level until stopped. Diagnostic aid only.
pub fn spawn_monitor(manager: Arc<ResourceManager>, num_stages: usize) -> MonitorHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let join = thread::Builder::new()
        .name("resource-monitor".to_string())
        .spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_secs(1));
                for kind in [DeviceKind::Cpu, DeviceKind::Gpu] {
                    if let Some(device) = manager.device(kind) {
                        tracing::debug!(
                            device = %kind,
                            used = device.used_cores(),
                            total = device.total_cores(),
                            queued = device.total_queued(),
                            "occupancy"
                        );
                        for stage in 0..num_stages {
                            tracing::debug!(
                                device = %kind,
                                stage,
                                queue = device.queue_len(stage),
                                "stage queue"
                            );
                        }
                    }
                }
            }
        })
        .expect("failed to spawn resource monitor");
    MonitorHandle { stop, join: Some(join) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(cpu_cores: usize, cpu_queue: usize, gpu_cores: usize, gpu_queue: usize) -> Arc<ResourceManager> {
        let mut manager = ResourceManager::new();
        let cpu = Arc::new(DeviceUnit::new(DeviceKind::Cpu, cpu_cores));
        cpu.add_stage(0, cpu_cores, cpu_queue);
        cpu.map_stage(0, 0).unwrap();
        let gpu = Arc::new(DeviceUnit::new(DeviceKind::Gpu, gpu_cores));
        gpu.add_stage(0, gpu_cores, gpu_queue);
        gpu.map_stage(0, 0).unwrap();
        manager.add_device(cpu);
        manager.add_device(gpu);
        Arc::new(manager)
    }

    #[test]
    fn test_pinned_policy_stays_on_its_device() {
        let manager = manager(2, 2, 2, 2);

        for _ in 0..2 {
            let grant = manager
                .acquire_for_stage(0, StagePolicy::CpuOnly, DeviceKind::Cpu, AcquisitionMode::Default)
                .unwrap();
            assert_eq!(grant.device, DeviceKind::Cpu);
        }
        assert_eq!(manager.device(DeviceKind::Gpu).unwrap().used_cores(), 0);
        manager.release_for_stage(0, DeviceKind::Cpu);
        manager.release_for_stage(0, DeviceKind::Cpu);
    }

    #[test]
    fn test_adaptive_acquires_alternate_devices() {
        let manager = manager(4, 2, 4, 2);

        let first = manager
            .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::Default)
            .unwrap();
        let second = manager
            .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::Default)
            .unwrap();

        // Same thread, both devices free: the rebalance must not land both
        // acquires on the preferred device.
        assert_ne!(first.device, second.device);

        manager.release_for_stage(0, first.device);
        manager.release_for_stage(0, second.device);
    }

    #[test]
    fn test_default_mode_spreads_before_queuing() {
        let manager = manager(1, 2, 1, 2);

        // Saturate the CPU from a helper thread so this thread has no
        // last-used bias.
        let occupied = manager
            .acquire_for_stage(0, StagePolicy::CpuOnly, DeviceKind::Cpu, AcquisitionMode::Default)
            .unwrap();
        assert_eq!(occupied.device, DeviceKind::Cpu);

        let helper = Arc::clone(&manager);
        let grant = std::thread::spawn(move || {
            helper
                .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::Default)
                .unwrap()
        })
        .join()
        .unwrap();

        // The free GPU core wins over the CPU wait queue.
        assert_eq!(grant.device, DeviceKind::Gpu);
        assert_eq!(grant.status, AcquisitionStatus::AcquiredCore);

        manager.release_for_stage(0, DeviceKind::Cpu);
        manager.release_for_stage(0, DeviceKind::Gpu);
    }

    #[test]
    fn test_primary_secondary_overflows_when_queue_full() {
        let manager = manager(1, 1, 1, 2);

        // Hold the only CPU core.
        let held = manager
            .acquire_for_stage(0, StagePolicy::CpuOnly, DeviceKind::Cpu, AcquisitionMode::Default)
            .unwrap();
        assert_eq!(held.device, DeviceKind::Cpu);

        // Fill the single CPU FIFO slot with a blocked waiter.
        let filler = Arc::clone(&manager);
        let filler_join = std::thread::spawn(move || {
            filler
                .acquire_for_stage(0, StagePolicy::CpuOnly, DeviceKind::Cpu, AcquisitionMode::Default)
                .unwrap()
        });
        let cpu = Arc::clone(manager.device(DeviceKind::Cpu).unwrap());
        while cpu.queue_len(0) == 0 {
            std::thread::yield_now();
        }

        // Primary core busy, primary queue full: overflow to the GPU core.
        let overflow = Arc::clone(&manager);
        let grant = std::thread::spawn(move || {
            overflow
                .acquire_for_stage(
                    0,
                    StagePolicy::CpuOrGpu,
                    DeviceKind::Cpu,
                    AcquisitionMode::PrimarySecondary,
                )
                .unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(grant.device, DeviceKind::Gpu);

        manager.release_for_stage(0, DeviceKind::Cpu);
        let queued = filler_join.join().unwrap();
        assert_eq!(queued.status, AcquisitionStatus::Enqueued);
        manager.release_for_stage(0, DeviceKind::Cpu);
        manager.release_for_stage(0, DeviceKind::Gpu);
    }

    #[test]
    fn test_no_queue_mode_fails_fast() {
        let manager = manager(1, 4, 1, 4);

        let cpu_grant = manager
            .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::NoQueue)
            .unwrap();
        let gpu_grant = manager
            .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::NoQueue)
            .unwrap();
        assert_ne!(cpu_grant.device, gpu_grant.device);

        // Both cores held: the next attempt fails without blocking.
        assert!(manager
            .acquire_for_stage(0, StagePolicy::CpuOrGpu, DeviceKind::Cpu, AcquisitionMode::NoQueue)
            .is_none());

        manager.release_for_stage(0, cpu_grant.device);
        manager.release_for_stage(0, gpu_grant.device);
    }

    #[test]
    fn test_idle_reflects_outstanding_grants() {
        let manager = manager(1, 1, 1, 1);
        assert!(manager.idle());

        let grant = manager
            .acquire_for_stage(0, StagePolicy::CpuOnly, DeviceKind::Cpu, AcquisitionMode::Default)
            .unwrap();
        assert!(!manager.idle());

        manager.release_for_stage(0, grant.device);
        assert!(manager.idle());
    }
}
