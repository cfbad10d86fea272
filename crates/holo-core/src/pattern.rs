//! Phase-pattern synthesis.
//!
//! The [`PatternGenerator`] turns physical parameters into `(resY, resX)` phase
//! maps whose values are conceptually in `[0, 255]`. No kernel applies the
//! `mod 256` wrap itself: the wrap is applied exactly once, by the
//! [`HologramComposer`](crate::hologram::HologramComposer) or by the optimiser
//! for the probe zone.
//!
//! ## Lens
//!
//! With focus $f$, wavelength $\lambda$ and pixel pitch $p$ in metres,
//!
//! $$
//! \phi(X, Y) = \frac{\gamma\,\big((X-x_0)^2 + (Y-y_0)^2\big)\,p^2}{2\pi},
//! \qquad \gamma = \frac{\pi}{\lambda f}
//! $$
//!
//! masked to $r < |r_N / p|$ with $r_N = \lambda f / 2p$, and scaled by 255.
//!
//! ## Grating
//!
//! $$ g(X, Y) = \frac{255}{P}\,(Y \sin\alpha + X \cos\alpha), \qquad P = \frac{10^{-3}}{L\,p} $$
//!
//! where $L$ is the line density (lines/mm) and $P$ the period in pixels.

use std::f64::consts::PI;
use std::sync::Arc;

use holo_compute::{ComputeBackend, ComputeError};
use log::debug;
use ndarray::Array2;
use thiserror::Error;

use crate::coords::CoordinateMesh;
use crate::types::{GratingParameters, LensParameters, ZernikeCoefficientSet};
use crate::zernike::{ansi_to_nm, ZernikeMode, MAX_RADIAL_DEGREE};

/// Errors raised while synthesising a pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Invalid resolution {res_x}x{res_y}: both dimensions must be positive")]
    InvalidResolution { res_x: usize, res_y: usize },

    #[error("Zernike index {index} has radial degree {n}, above the supported maximum of {max}")]
    ZernikeOrderTooHigh { index: usize, n: u32, max: u32 },

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// Synthesises lens, grating and Zernike phase maps.
///
/// The generator owns its [`CoordinateMesh`]; the mesh is rebuilt only when a
/// call asks for a different resolution than the cached one.
pub struct PatternGenerator {
    backend: Arc<dyn ComputeBackend>,
    mesh: Option<CoordinateMesh>,
    mesh_builds: usize,
}

impl Default for PatternGenerator {
    fn default() -> Self {
        Self::new(holo_compute::default_backend())
    }
}

impl PatternGenerator {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            backend,
            mesh: None,
            mesh_builds: 0,
        }
    }

    /// Backend used for every per-pixel kernel.
    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// The cached coordinate mesh, if one has been built.
    pub fn coordinate_mesh(&self) -> Option<&CoordinateMesh> {
        self.mesh.as_ref()
    }

    /// How many times the coordinate mesh has been (re)built.
    pub fn mesh_builds(&self) -> usize {
        self.mesh_builds
    }

    /// Lens phase map. See the module documentation for the formula.
    pub fn generate_lens(
        &mut self,
        params: &LensParameters,
        res_x: usize,
        res_y: usize,
    ) -> Result<Array2<f64>, PatternError> {
        check_resolution(res_x, res_y)?;

        let focus_mm = if params.focus_mm == 0.0 { 1.0 } else { params.focus_mm };
        let focus = focus_mm * 1e-3;
        let wl = params.wavelength_nm * 1e-9;
        let pitch = params.pixel_pitch_um * 1e-6;

        let gamma = PI / (wl * focus);
        let r_n = wl * focus / (2.0 * pitch);
        let r_max = (r_n / pitch).abs();
        let (x0, y0) = (params.offset_x, params.offset_y);

        let backend = Arc::clone(&self.backend);
        let mesh = self.mesh_for(res_x, res_y);
        let (xs, ys) = (mesh.x(), mesh.y());

        let lens = backend.parallel_grid_fill(res_y, res_x, &|i, j| {
            let dx = xs[[i, j]] - x0;
            let dy = ys[[i, j]] - y0;
            if (dx * dx + dy * dy).sqrt() < r_max {
                let phi = gamma * ((dx * pitch).powi(2) + (dy * pitch).powi(2)) / (2.0 * PI);
                phi * 255.0
            } else {
                0.0
            }
        })?;
        Ok(lens)
    }

    /// Blazed grating phase map. A line density of exactly 0 yields the
    /// all-zero pattern without touching the coordinate mesh.
    pub fn generate_grating(
        &mut self,
        params: &GratingParameters,
        res_x: usize,
        res_y: usize,
    ) -> Result<Array2<f64>, PatternError> {
        check_resolution(res_x, res_y)?;
        if params.lines_per_mm == 0.0 {
            return Ok(Array2::zeros((res_y, res_x)));
        }

        let pitch = params.pixel_pitch_um * 1e-6;
        let period_px = 1e-3 / params.lines_per_mm / pitch;
        let scale = 255.0 / period_px;
        let (sin_a, cos_a) = params.angle_rad.sin_cos();

        let backend = Arc::clone(&self.backend);
        let mesh = self.mesh_for(res_x, res_y);
        let (xs, ys) = (mesh.x(), mesh.y());

        let grating = backend.parallel_grid_fill(res_y, res_x, &|i, j| {
            scale * (ys[[i, j]] * sin_a + xs[[i, j]] * cos_a)
        })?;
        Ok(grating)
    }

    /// Weighted sum of Zernike modes, scaled by 255.
    ///
    /// Pixel coordinates are recentred as `x = X − cx + resX/2`,
    /// `y = Y − cy − resY/2` and normalised by the pupil radius
    /// `min(resX, resY)/2` before evaluation.
    pub fn generate_zernike(
        &mut self,
        set: &ZernikeCoefficientSet,
        res_x: usize,
        res_y: usize,
    ) -> Result<Array2<f64>, PatternError> {
        check_resolution(res_x, res_y)?;

        let modes = set
            .coefficients
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != 0.0)
            .map(|(index, &c)| {
                let (n, m) = ansi_to_nm(index);
                ZernikeMode::new(n, m, c).ok_or(PatternError::ZernikeOrderTooHigh {
                    index,
                    n,
                    max: MAX_RADIAL_DEGREE,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if modes.is_empty() {
            return Ok(Array2::zeros((res_y, res_x)));
        }

        let shift_x = res_x as f64 / 2.0 - set.center_x;
        let shift_y = -(res_y as f64 / 2.0) - set.center_y;
        let pupil = res_x.min(res_y) as f64 / 2.0;
        let pupil = if pupil > 0.0 { pupil } else { 1.0 };

        let backend = Arc::clone(&self.backend);
        let mesh = self.mesh_for(res_x, res_y);
        let (xs, ys) = (mesh.x(), mesh.y());

        let zernike = backend.parallel_grid_fill(res_y, res_x, &|i, j| {
            let x = xs[[i, j]] + shift_x;
            let y = ys[[i, j]] + shift_y;
            let rho = (x * x + y * y).sqrt() / pupil;
            let theta = y.atan2(x);
            255.0 * modes.iter().map(|mode| mode.eval(rho, theta)).sum::<f64>()
        })?;
        Ok(zernike)
    }

    /// All-zero pattern of the given size.
    pub fn empty_pattern(res_x: usize, res_y: usize) -> Result<Array2<f64>, PatternError> {
        check_resolution(res_x, res_y)?;
        Ok(Array2::zeros((res_y, res_x)))
    }

    /// Return the cached mesh, rebuilding it if the resolution changed.
    fn mesh_for(&mut self, res_x: usize, res_y: usize) -> &CoordinateMesh {
        match &self.mesh {
            Some(mesh) if mesh.matches(res_x, res_y) => {}
            _ => {
                debug!("Building coordinate mesh {}x{}", res_x, res_y);
                self.mesh_builds += 1;
                self.mesh = Some(CoordinateMesh::new(res_x, res_y));
            }
        }
        self.mesh
            .get_or_insert_with(|| CoordinateMesh::new(res_x, res_y))
    }
}

fn check_resolution(res_x: usize, res_y: usize) -> Result<(), PatternError> {
    if res_x == 0 || res_y == 0 {
        return Err(PatternError::InvalidResolution { res_x, res_y });
    }
    Ok(())
}
