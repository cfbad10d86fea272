//! Single-threaded backend, used when Rayon is disabled and as a reference
//! implementation in tests.

use ndarray::Array2;

use crate::backend::{check_shape, BackendType, ComputeBackend, ComputeError, DeviceInfo, FillFn};

/// Backend that visits pixels in row-major order on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial".into(),
            backend_type: BackendType::Serial,
            compute_units: Some(1),
        }
    }

    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &FillFn<'_>,
    ) -> Result<Array2<f64>, ComputeError> {
        check_shape(rows, cols)?;
        Ok(Array2::from_shape_fn((rows, cols), |(i, j)| fill_fn(i, j)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_row_major() {
        let grid = SerialBackend
            .parallel_grid_fill(2, 3, &|i, j| (i * 10 + j) as f64)
            .unwrap();
        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[1, 2]], 12.0);
        assert_eq!(grid.as_slice().unwrap(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_zero_rows_rejected() {
        let err = SerialBackend.parallel_grid_fill(0, 4, &|_, _| 0.0).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidShape { rows: 0, cols: 4 }));
    }
}
