// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Image Geometry Value Object
//!
//! Describes the input frame dimensions and the fixed classifier window
//! constants from which every per-frame scratch buffer shape is derived.
//! The geometry is decided once at startup (from the resolution preset or a
//! custom size) and shared read-only by the frame ring, the kernels, and
//! the report writer.
//!
//! ## Buffer Shapes
//!
//! | Buffer | Shape | Producer |
//! |--------|-------|----------|
//! | `frame` (shared) | `height × width` | input prototype |
//! | `ind`, `val` | `height × width` | cosine filter |
//! | `his` | `(height/cell)·(width/cell) × dict_size` | block histogram |
//! | `cla` (shared) | `block² · blocks_x · blocks_y × dict_size` | classifier prototype |
//! | `out` | `cla_rows × his_rows` | pairwise distance |

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Frame dimensions plus classifier window constants.
///
/// The window constants match the classifier the filter stages were
/// written for and are not user configurable; only the frame resolution
/// varies between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Frame height in pixels.
    pub height: usize,
    /// Frame width in pixels.
    pub width: usize,
    /// Number of filters in the cosine filter bank.
    pub num_filters: usize,
    /// Square filter side (3 → 9 taps).
    pub filter_dim: usize,
    /// Classifier window height.
    pub window_height: usize,
    /// Classifier window width.
    pub window_width: usize,
    /// Histogram cell side in pixels.
    pub cell_size: usize,
    /// Classifier block side in cells.
    pub block_size: usize,
    /// Histogram dictionary size (bins per cell).
    pub dict_size: usize,
}

impl ImageGeometry {
    /// Builds the geometry for a resolution preset (0..=5).
    ///
    /// Presets: 0 → 1280×720, 1 → 1920×1080, 2 → 2560×1440,
    /// 3 → 3840×2160, 4 → 5120×2880, 5 → 7680×4320.
    pub fn from_resolution(preset: u32) -> Result<Self, PipelineError> {
        let (height, width) = match preset {
            0 => (720, 1280),
            1 => (1080, 1920),
            2 => (1440, 2560),
            3 => (2160, 3840),
            4 => (2880, 5120),
            5 => (4320, 7680),
            other => {
                return Err(PipelineError::invalid_config(format!(
                    "resolution preset must be in 0..=5, got {}",
                    other
                )))
            }
        };
        Ok(Self::with_frame(height, width))
    }

    /// Builds a geometry with an explicit frame size (used by tests and
    /// synthetic workloads). Dimensions must be multiples of the cell size.
    pub fn with_frame(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            num_filters: 100,
            filter_dim: 3,
            window_height: 128,
            window_width: 64,
            cell_size: 8,
            block_size: 2,
            dict_size: 100,
        }
    }

    /// Number of taps in one filter.
    pub fn filter_size(&self) -> usize {
        self.filter_dim * self.filter_dim
    }

    /// Total elements of the filter bank.
    pub fn filter_bank_len(&self) -> usize {
        self.num_filters * self.filter_size()
    }

    /// Elements of one full-frame plane (`frame`, `ind`, `val`).
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// Rows of the per-frame histogram buffer.
    pub fn histogram_rows(&self) -> usize {
        (self.height / self.cell_size) * (self.width / self.cell_size)
    }

    /// Elements of the per-frame histogram buffer.
    pub fn histogram_len(&self) -> usize {
        self.histogram_rows() * self.dict_size
    }

    /// Rows of the shared classifier matrix.
    pub fn classifier_rows(&self) -> usize {
        let cells_x = self.window_width / self.cell_size;
        let cells_y = self.window_height / self.cell_size;
        let blocks_x = cells_x - self.block_size + 1;
        let blocks_y = cells_y - self.block_size + 1;
        self.block_size * self.block_size * blocks_x * blocks_y
    }

    /// Elements of the shared classifier matrix.
    pub fn classifier_len(&self) -> usize {
        self.classifier_rows() * self.dict_size
    }

    /// Elements of the per-frame distance output buffer.
    pub fn output_len(&self) -> usize {
        self.classifier_rows() * self.histogram_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_presets() {
        let geometry = ImageGeometry::from_resolution(1).unwrap();
        assert_eq!((geometry.height, geometry.width), (1080, 1920));

        let geometry = ImageGeometry::from_resolution(5).unwrap();
        assert_eq!((geometry.height, geometry.width), (4320, 7680));

        assert!(ImageGeometry::from_resolution(6).is_err());
    }

    #[test]
    fn test_derived_shapes() {
        let geometry = ImageGeometry::with_frame(64, 48);
        assert_eq!(geometry.plane_len(), 64 * 48);
        assert_eq!(geometry.histogram_rows(), 8 * 6);
        assert_eq!(geometry.histogram_len(), 48 * 100);
        // 128/8 = 16 cells, 64/8 = 8 cells; blocks: 15 x 7; 2*2 coefficients
        assert_eq!(geometry.classifier_rows(), 4 * 15 * 7);
        assert_eq!(geometry.output_len(), 4 * 15 * 7 * 48);
    }

    #[test]
    fn test_filter_bank_size() {
        let geometry = ImageGeometry::with_frame(64, 48);
        assert_eq!(geometry.filter_size(), 9);
        assert_eq!(geometry.filter_bank_len(), 900);
    }
}
