// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Frame Ring
//!
//! Fixed-capacity pool of reusable frames. All frames are allocated once
//! at construction; the input stage claims one with [`FrameRing::get`],
//! exactly one pipeline slot owns it while in flight, and the output stage
//! hands it back with [`FrameRing::recycle`], which resets it in place.
//!
//! Frames are owned values, so the ring is a pure pool rather than an
//! index-chasing circular buffer: claiming *moves* the frame out, which
//! makes the single-owner discipline a compile-time property instead of a
//! convention. The lock-free bounded queue underneath keeps claim and
//! recycle cheap from any thread.

use crossbeam::queue::ArrayQueue;

use hybrid_pipeline_domain::entities::Frame;
use hybrid_pipeline_domain::value_objects::ImageGeometry;

/// Pool of pre-allocated frames.
#[derive(Debug)]
pub struct FrameRing {
    slots: ArrayQueue<Frame>,
    capacity: usize,
}

impl FrameRing {
    /// Allocates `capacity` frames dimensioned by the geometry.
    pub fn new(capacity: usize, geometry: &ImageGeometry, num_stages: usize) -> Self {
        let slots = ArrayQueue::new(capacity.max(1));
        for slot in 0..capacity.max(1) {
            let frame = Frame::new(slot, geometry, num_stages);
            // Freshly built queue of matching capacity; cannot overflow.
            let _ = slots.push(frame);
        }
        tracing::debug!(capacity = capacity.max(1), "frame ring allocated");
        Self {
            slots,
            capacity: capacity.max(1),
        }
    }

    /// Claims the next free frame; `None` when every frame is in flight.
    pub fn get(&self) -> Option<Frame> {
        self.slots.pop()
    }

    /// Resets a frame and returns it to the pool.
    pub fn recycle(&self, mut frame: Frame) {
        frame.recycle();
        if self.slots.push(frame).is_err() {
            // Can only happen if a frame from another ring is recycled
            // here; dropping it is the least bad option.
            tracing::error!("frame ring overflow on recycle, dropping frame");
        }
    }

    /// Total number of frames owned by the ring.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently available for claim.
    pub fn available(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ImageGeometry {
        ImageGeometry::with_frame(16, 16)
    }

    #[test]
    fn test_claims_exhaust_capacity() {
        let ring = FrameRing::new(2, &geometry(), 3);
        assert_eq!(ring.available(), 2);

        let a = ring.get().unwrap();
        let b = ring.get().unwrap();
        assert!(ring.get().is_none());
        assert_eq!(ring.available(), 0);

        ring.recycle(a);
        ring.recycle(b);
        assert_eq!(ring.available(), 2);
    }

    #[test]
    fn test_recycle_resets_frame() {
        let ring = FrameRing::new(1, &geometry(), 3);
        let mut frame = ring.get().unwrap();
        frame.frame_no = 9;
        frame.gpu_frame = true;
        frame.buffers().val.lock()[0] = 5.0;
        ring.recycle(frame);

        let frame = ring.get().unwrap();
        assert_eq!(frame.frame_no, 0);
        assert!(!frame.gpu_frame);
        assert_eq!(frame.buffers().val.lock()[0], 0.0);
    }

    #[test]
    fn test_slots_are_distinct() {
        let ring = FrameRing::new(3, &geometry(), 3);
        let frames: Vec<_> = (0..3).map(|_| ring.get().unwrap()).collect();
        let mut slots: Vec<_> = frames.iter().map(|frame| frame.slot()).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
        for frame in frames {
            ring.recycle(frame);
        }
    }
}
