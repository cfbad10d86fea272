//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over execution strategies so that
//! the pattern kernels in `holo-core` only describe *what* each pixel holds.
//! Grids are always `(rows, cols) = (resY, resX)` in row-major order.

use ndarray::Array2;
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid grid shape {rows}x{cols}: both dimensions must be non-zero")]
    InvalidShape { rows: usize, cols: usize },

    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
    Serial,
}

/// Per-pixel fill function: `(row, col) -> value`.
pub type FillFn<'a> = dyn Fn(usize, usize) -> f64 + Send + Sync + 'a;

/// Per-pixel in-place update: `(row, col, &mut value)`.
pub type UpdateFn<'a> = dyn Fn(usize, usize, &mut f64) + Send + Sync + 'a;

/// Abstraction over compute backends.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Build a `rows x cols` grid where every pixel is computed independently.
    ///
    /// This is the entry point for all pattern synthesis: each pixel of a lens,
    /// grating or Zernike map depends only on its own coordinates.
    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &FillFn<'_>,
    ) -> Result<Array2<f64>, ComputeError>;

    /// Rewrite an existing grid in place, one pixel at a time.
    ///
    /// Used by the optimiser's fast path, which only touches the pixels of
    /// a single zone and must not reallocate the frame buffer.
    fn parallel_grid_update(
        &self,
        grid: &mut Array2<f64>,
        update_fn: &UpdateFn<'_>,
    ) -> Result<(), ComputeError> {
        for ((i, j), value) in grid.indexed_iter_mut() {
            update_fn(i, j, value);
        }
        Ok(())
    }
}

/// Reject empty grids before any backend allocates.
pub(crate) fn check_shape(rows: usize, cols: usize) -> Result<(), ComputeError> {
    if rows == 0 || cols == 0 {
        return Err(ComputeError::InvalidShape { rows, cols });
    }
    Ok(())
}
