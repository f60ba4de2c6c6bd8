// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Kernels
//!
//! The pipeline's stage functions. From the dispatch layer's point of view
//! these are opaque: a kernel reads shared read-only inputs, transforms a
//! frame's scratch planes, and either runs inline (CPU path) or is placed
//! on a device submission queue (GPU path, event chaining).
//!
//! Two kernel families ship here:
//!
//! - [`filters`] - the default image pipeline: cosine filter, block
//!   histogram, pairwise distance; plain scalar code.
//! - [`workload`] - a synthetic kernel that spins for a configured service
//!   time, used for workload simulation and by the test suite.
//!
//! [`registry::StageRegistry`] maps `(stage index, device kind)` to a
//! kernel instance.

pub mod filters;
pub mod registry;
pub mod workload;

pub use registry::{StageKernel, StageRegistry};
pub use workload::WorkloadKernel;

use rand::Rng;
use std::sync::Arc;

use hybrid_pipeline_domain::value_objects::ImageGeometry;

/// Shared read-only inputs every kernel sees: the input plane, the
/// classifier matrix, and the filter bank.
///
/// These are the prototype buffers all frames share; per-frame scratch
/// lives in the frame itself.
#[derive(Debug, Clone)]
pub struct SharedInputs {
    pub geometry: ImageGeometry,
    pub frame: Arc<Vec<f32>>,
    pub classifier: Arc<Vec<f32>>,
    pub filter_bank: Arc<Vec<f32>>,
}

impl SharedInputs {
    /// Synthesizes the prototype buffers for a geometry: a smooth input
    /// plane, a random filter bank, and random classifier coefficients.
    pub fn synthesize(geometry: ImageGeometry) -> Self {
        let mut rng = rand::rng();

        let frame = (0..geometry.plane_len())
            .map(|index| {
                let y = (index / geometry.width) as f32;
                let x = (index % geometry.width) as f32;
                ((x * 0.05).sin() + (y * 0.05).cos()) * 0.5
            })
            .collect();

        let filter_bank = (0..geometry.filter_bank_len())
            .map(|_| rng.random_range(0.000_000_01f32..0.000_000_99))
            .collect();

        let classifier = (0..geometry.classifier_len())
            .map(|_| rng.random_range(0.05f32..0.099))
            .collect();

        Self {
            geometry,
            frame: Arc::new(frame),
            classifier: Arc::new(classifier),
            filter_bank: Arc::new(filter_bank),
        }
    }
}
