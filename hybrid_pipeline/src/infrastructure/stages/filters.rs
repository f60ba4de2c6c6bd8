// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Default Image Filters
//!
//! The three stages of the default pipeline, written as plain scalar
//! loops. The dispatch layer treats them as opaque; nothing here knows
//! about devices or admission.
//!
//! 1. **Cosine filter** - convolves every interior pixel with the filter
//!    bank and records the best-responding filter index (`ind`) and its
//!    absolute response (`val`).
//! 2. **Block histogram** - accumulates the per-pixel filter indices into
//!    per-cell weight histograms (`his`).
//! 3. **Pairwise distance** - squared Euclidean distances between the
//!    classifier rows and the cell histograms (`out`).

use hybrid_pipeline_domain::entities::FrameBuffers;
use hybrid_pipeline_domain::PipelineError;

use crate::infrastructure::stages::registry::StageKernel;
use crate::infrastructure::stages::SharedInputs;

/// Stage 0: filter-bank convolution with argmax selection.
#[derive(Debug, Default)]
pub struct CosineFilter;

impl StageKernel for CosineFilter {
    fn name(&self) -> &str {
        "cosine_filter"
    }

    fn run(&self, buffers: &FrameBuffers, inputs: &SharedInputs) -> Result<(), PipelineError> {
        let geometry = &inputs.geometry;
        let height = geometry.height;
        let width = geometry.width;
        let filter_dim = geometry.filter_dim;
        let filter_size = geometry.filter_size();
        let num_filters = geometry.num_filters;
        let apron = filter_dim / 2;

        let frame = inputs.frame.as_slice();
        let bank = inputs.filter_bank.as_slice();
        let mut ind = buffers.ind.lock();
        let mut val = buffers.val.lock();

        let mut offsets = Vec::with_capacity(filter_size);
        for dy in -(apron as isize)..=(apron as isize) {
            for dx in -(apron as isize)..=(apron as isize) {
                offsets.push(dy * width as isize + dx);
            }
        }

        let mut patch = vec![0.0f32; filter_size];
        for y in apron..height - apron {
            for x in apron..width - apron {
                let center = (y * width + x) as isize;
                for (slot, offset) in patch.iter_mut().zip(&offsets) {
                    *slot = frame[(center + offset) as usize];
                }

                let mut best_response = f32::MIN;
                let mut best_filter = 0usize;
                for filter in 0..num_filters {
                    let taps = &bank[filter * filter_size..(filter + 1) * filter_size];
                    let response: f32 = patch.iter().zip(taps).map(|(pixel, tap)| pixel * tap).sum();
                    let response = response.abs();
                    if response > best_response {
                        best_response = response;
                        best_filter = filter;
                    }
                }

                ind[y * width + x] = best_filter as f32;
                val[y * width + x] = best_response;
            }
        }
        Ok(())
    }
}

/// Stage 1: per-cell weight histograms of the filter indices.
#[derive(Debug, Default)]
pub struct BlockHistogram;

impl StageKernel for BlockHistogram {
    fn name(&self) -> &str {
        "block_histogram"
    }

    fn run(&self, buffers: &FrameBuffers, inputs: &SharedInputs) -> Result<(), PipelineError> {
        let geometry = &inputs.geometry;
        let cell = geometry.cell_size;
        let dict = geometry.dict_size;
        let width = geometry.width;
        let parts_y = (geometry.height - 2) / cell;
        let parts_x = (geometry.width - 2) / cell;

        let ind = buffers.ind.lock();
        let val = buffers.val.lock();
        let mut his = buffers.his.lock();

        for cell_y in 0..parts_y {
            for cell_x in 0..parts_x {
                let out_base = (cell_y * parts_x + cell_x) * dict;
                for dy in 0..cell {
                    let row = 1 + cell_y * cell + dy;
                    let col = 1 + cell_x * cell;
                    for dx in 0..cell {
                        let pixel = row * width + col + dx;
                        let bin = (ind[pixel] as usize).min(dict - 1);
                        his[out_base + bin] += val[pixel];
                    }
                }
            }
        }
        Ok(())
    }
}

/// Stage 2: squared distances between classifier rows and cell histograms.
#[derive(Debug, Default)]
pub struct PairwiseDistance;

impl StageKernel for PairwiseDistance {
    fn name(&self) -> &str {
        "pairwise_distance"
    }

    fn run(&self, buffers: &FrameBuffers, inputs: &SharedInputs) -> Result<(), PipelineError> {
        let geometry = &inputs.geometry;
        let dict = geometry.dict_size;
        let cla_rows = geometry.classifier_rows();
        let his_rows = geometry.histogram_rows();

        let classifier = inputs.classifier.as_slice();
        let his = buffers.his.lock();
        let mut out = buffers.out.lock();

        for i in 0..cla_rows {
            let cla_row = &classifier[i * dict..(i + 1) * dict];
            for j in 0..his_rows {
                let his_row = &his[j * dict..(j + 1) * dict];
                let mut sum = 0.0f32;
                for (a, b) in cla_row.iter().zip(his_row) {
                    let diff = a - b;
                    sum += diff * diff;
                }
                out[i * his_rows + j] = sum;
            }
        }
        Ok(())
    }
}
