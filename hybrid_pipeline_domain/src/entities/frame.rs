// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Frame Entity
//!
//! The item that flows through the pipeline. A frame owns its per-stage
//! scratch planes and carries everything a stage needs to know about what
//! happened to it so far: which device ran each stage, how long each stage
//! took on which device, and the completion handles of prior submissions
//! (for event chaining).
//!
//! ## Lifecycle
//!
//! Frames are created once when the ring is built and are never destroyed
//! until the ring drops. The input stage claims a frame and stamps it with
//! a monotonic frame number; exactly one pipeline slot owns the frame at
//! any moment; on pipeline exit the frame is recycled (scratch zeroed,
//! histories cleared, decoupled marker reset) and returned to the ring.
//!
//! ## Ownership of Scratch Planes
//!
//! The scratch planes sit behind `Arc<FrameBuffers>` with a per-plane
//! mutex. Stages of one frame run strictly sequentially, so there is never
//! lock contention on a plane; the indirection exists so an asynchronously
//! submitted kernel can keep writing after the submitting thread has moved
//! on, and the mutex makes that hand-off sound without `unsafe`.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::entities::CompletionHandle;
use crate::value_objects::{DeviceKind, ImageGeometry};

/// Per-frame scratch planes.
///
/// Shapes are fixed by the image geometry: `ind`/`val` are full-frame
/// planes written by the cosine filter, `his` is the block histogram, and
/// `out` the pairwise-distance result. The input plane and the classifier
/// matrix are shared read-only prototypes owned by the application context,
/// not by the frame.
#[derive(Debug)]
pub struct FrameBuffers {
    /// Filter-bank argmax indices, `height × width`.
    pub ind: Mutex<Vec<f32>>,
    /// Filter-bank response weights, `height × width`.
    pub val: Mutex<Vec<f32>>,
    /// Cell histograms, `histogram_rows × dict_size`.
    pub his: Mutex<Vec<f32>>,
    /// Pairwise distances, `classifier_rows × histogram_rows`.
    pub out: Mutex<Vec<f32>>,
}

impl FrameBuffers {
    /// Allocates zeroed planes for the given geometry.
    pub fn allocate(geometry: &ImageGeometry) -> Self {
        Self {
            ind: Mutex::new(vec![0.0; geometry.plane_len()]),
            val: Mutex::new(vec![0.0; geometry.plane_len()]),
            his: Mutex::new(vec![0.0; geometry.histogram_len()]),
            out: Mutex::new(vec![0.0; geometry.output_len()]),
        }
    }

    /// Zeroes every plane in place, keeping the allocations.
    pub fn clear(&self) {
        for plane in [&self.ind, &self.val, &self.his, &self.out] {
            plane.lock().fill(0.0);
        }
    }
}

/// One in-flight pipeline item.
#[derive(Debug)]
pub struct Frame {
    /// Ring slot identity, assigned at construction.
    slot: usize,
    /// Monotonic frame number, stamped by the input stage on each claim.
    pub frame_no: u64,
    /// Decoupled-mode marker: the frame's single device decision.
    pub gpu_frame: bool,
    /// The device whose entry admission this frame holds, when the device
    /// was chosen (and acquired) once at pipeline entry. The output stage
    /// owes its release.
    pub entry_device: Option<DeviceKind>,
    /// Per-stage CPU execution times in milliseconds.
    pub cpu_ms: Vec<f64>,
    /// Per-stage GPU execution times in milliseconds.
    pub gpu_ms: Vec<f64>,
    /// Device that ran each completed stage, in stage order.
    pub devices: Vec<DeviceKind>,
    /// Completion handles of prior stage submissions, in stage order.
    pub handles: Vec<CompletionHandle>,
    buffers: Arc<FrameBuffers>,
}

impl Frame {
    /// Creates a recycled (pristine) frame for a ring slot.
    pub fn new(slot: usize, geometry: &ImageGeometry, num_stages: usize) -> Self {
        Self {
            slot,
            frame_no: 0,
            gpu_frame: false,
            entry_device: None,
            cpu_ms: vec![0.0; num_stages],
            gpu_ms: vec![0.0; num_stages],
            devices: Vec::with_capacity(num_stages),
            handles: Vec::with_capacity(num_stages),
            buffers: Arc::new(FrameBuffers::allocate(geometry)),
        }
    }

    /// Ring slot identity.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Shared scratch planes; clone the `Arc` to move them into a device
    /// submission.
    pub fn buffers(&self) -> &Arc<FrameBuffers> {
        &self.buffers
    }

    /// Number of stages this frame was dimensioned for.
    pub fn num_stages(&self) -> usize {
        self.cpu_ms.len()
    }

    /// Records the execution time of one stage on one device.
    pub fn record_time(&mut self, stage: usize, kind: DeviceKind, elapsed_ms: f64) {
        match kind {
            DeviceKind::Cpu => self.cpu_ms[stage] += elapsed_ms,
            DeviceKind::Gpu => self.gpu_ms[stage] += elapsed_ms,
        }
    }

    /// Records which device ran a stage and the handle it produced.
    pub fn record_stage(&mut self, kind: DeviceKind, handle: CompletionHandle) {
        self.devices.push(kind);
        self.handles.push(handle);
    }

    /// Returns the frame to its pristine state for reuse.
    ///
    /// Scratch planes are zeroed, event and device histories cleared, stage
    /// timings reset, and the decoupled marker dropped. The slot identity
    /// and the plane allocations are kept.
    pub fn recycle(&mut self) {
        self.buffers.clear();
        self.handles.clear();
        self.devices.clear();
        self.cpu_ms.fill(0.0);
        self.gpu_ms.fill(0.0);
        self.gpu_frame = false;
        self.entry_device = None;
        self.frame_no = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_geometry() -> ImageGeometry {
        ImageGeometry::with_frame(32, 24)
    }

    #[test]
    fn test_frame_allocation_shapes() {
        let geometry = small_geometry();
        let frame = Frame::new(3, &geometry, 3);

        assert_eq!(frame.slot(), 3);
        assert_eq!(frame.buffers().ind.lock().len(), geometry.plane_len());
        assert_eq!(frame.buffers().his.lock().len(), geometry.histogram_len());
        assert_eq!(frame.buffers().out.lock().len(), geometry.output_len());
    }

    #[test]
    fn test_record_time_accumulates_per_device() {
        let mut frame = Frame::new(0, &small_geometry(), 3);

        frame.record_time(1, DeviceKind::Cpu, 2.5);
        frame.record_time(1, DeviceKind::Cpu, 1.5);
        frame.record_time(2, DeviceKind::Gpu, 4.0);

        assert_eq!(frame.cpu_ms[1], 4.0);
        assert_eq!(frame.gpu_ms[2], 4.0);
        assert_eq!(frame.gpu_ms[1], 0.0);
    }

    #[test]
    fn test_recycle_resets_everything_but_allocations() {
        let geometry = small_geometry();
        let mut frame = Frame::new(0, &geometry, 3);

        frame.frame_no = 42;
        frame.gpu_frame = true;
        frame.entry_device = Some(DeviceKind::Gpu);
        frame.record_time(0, DeviceKind::Gpu, 3.0);
        frame.record_stage(DeviceKind::Gpu, CompletionHandle::pending());
        frame.buffers().ind.lock()[0] = 1.0;

        frame.recycle();

        assert_eq!(frame.frame_no, 0);
        assert!(!frame.gpu_frame);
        assert!(frame.entry_device.is_none());
        assert!(frame.handles.is_empty());
        assert!(frame.devices.is_empty());
        assert_eq!(frame.gpu_ms[0], 0.0);
        assert_eq!(frame.buffers().ind.lock()[0], 0.0);
        assert_eq!(frame.buffers().ind.lock().len(), geometry.plane_len());
    }
}
