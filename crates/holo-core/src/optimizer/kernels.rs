//! Per-pixel kernels of the optimiser.
//!
//! Both run through the [`ComputeBackend`] so the full rebuild and the
//! probe-only fast path share the same parallel execution.

use holo_compute::{ComputeBackend, ComputeError};
use ndarray::Array2;

use crate::types::ZoneId;

/// Interference value plus a phase offset, wrapped into `[0, 256)`.
#[inline]
pub fn probe_value(interference: f64, phase: f64) -> f64 {
    (interference + phase).rem_euclid(256.0)
}

/// Build a complete frame: the interference grating inside the reference
/// zone, the phase-shifted interference grating inside the probe zone and the
/// offset grating everywhere else.
pub fn load_pattern(
    backend: &dyn ComputeBackend,
    zones: &Array2<ZoneId>,
    offset: &Array2<f64>,
    interference: &Array2<f64>,
    reference: ZoneId,
    probe: ZoneId,
    phase: f64,
) -> Result<Array2<f64>, ComputeError> {
    let (rows, cols) = zones.dim();
    backend.parallel_grid_fill(rows, cols, &|i, j| match zones[[i, j]] {
        z if z == reference => interference[[i, j]],
        z if z == probe => probe_value(interference[[i, j]], phase),
        _ => offset[[i, j]],
    })
}

/// Rewrite only the probe-zone pixels of `pattern` for a new phase.
pub fn next_step_fast(
    backend: &dyn ComputeBackend,
    zones: &Array2<ZoneId>,
    interference: &Array2<f64>,
    probe: ZoneId,
    phase: f64,
    pattern: &mut Array2<f64>,
) -> Result<(), ComputeError> {
    backend.parallel_grid_update(pattern, &|i, j, value| {
        if zones[[i, j]] == probe {
            *value = probe_value(interference[[i, j]], phase);
        }
    })
}
