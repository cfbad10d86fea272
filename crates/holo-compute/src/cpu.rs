//! CPU compute backend using Rayon for shared-memory parallelism.

use ndarray::Array2;
use rayon::prelude::*;

use crate::backend::{
    check_shape, BackendType, ComputeBackend, ComputeError, DeviceInfo, FillFn, UpdateFn,
};

/// CPU backend that parallelises pixel work across threads via Rayon.
pub struct CpuBackend {
    num_threads: usize,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &FillFn<'_>,
    ) -> Result<Array2<f64>, ComputeError> {
        check_shape(rows, cols)?;

        let data: Vec<f64> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| fill_fn(idx / cols, idx % cols))
            .collect();

        Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| ComputeError::DeviceError(e.to_string()))
    }

    fn parallel_grid_update(
        &self,
        grid: &mut Array2<f64>,
        update_fn: &UpdateFn<'_>,
    ) -> Result<(), ComputeError> {
        let cols = grid.ncols();
        match grid.as_slice_mut() {
            Some(slice) => {
                slice
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(idx, value)| update_fn(idx / cols, idx % cols, value));
            }
            // Non-contiguous views fall back to an ordered walk.
            None => {
                for ((i, j), value) in grid.indexed_iter_mut() {
                    update_fn(i, j, value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialBackend;
    use approx::assert_relative_eq;

    #[test]
    fn test_cpu_matches_serial() {
        let f = |i: usize, j: usize| (i as f64).sin() * 3.0 + j as f64;
        let cpu = CpuBackend::new().parallel_grid_fill(17, 23, &f).unwrap();
        let serial = SerialBackend.parallel_grid_fill(17, 23, &f).unwrap();
        for (a, b) in cpu.iter().zip(serial.iter()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn test_update_in_place() {
        let backend = CpuBackend::new();
        let mut grid = backend.parallel_grid_fill(4, 5, &|_, _| 1.0).unwrap();
        backend
            .parallel_grid_update(&mut grid, &|i, _, v| {
                if i == 2 {
                    *v = 7.0;
                }
            })
            .unwrap();
        assert_eq!(grid.row(2).sum(), 35.0);
        assert_eq!(grid.row(1).sum(), 5.0);
    }
}
