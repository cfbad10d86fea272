//! Centred pixel-coordinate grids.
//!
//! Every pattern kernel evaluates a function of the pixel position. The
//! [`CoordinateMesh`] holds the X and Y coordinate of every pixel, centred on
//! the SLM: X spans `[-⌊resX/2⌋, ⌊resX/2⌋]` in `resX` evenly spaced samples and
//! Y likewise. Building it is `O(resX·resY)`, so the
//! [`PatternGenerator`](crate::pattern::PatternGenerator) keeps one and only
//! rebuilds it when the resolution changes.

use ndarray::Array2;

/// X/Y coordinate grids, each of shape `(resY, resX)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateMesh {
    x: Array2<f64>,
    y: Array2<f64>,
}

impl CoordinateMesh {
    /// Build the coordinate grids for a `res_x × res_y` SLM.
    pub fn new(res_x: usize, res_y: usize) -> Self {
        let xs = centred_axis(res_x);
        let ys = centred_axis(res_y);
        let x = Array2::from_shape_fn((res_y, res_x), |(_, j)| xs[j]);
        let y = Array2::from_shape_fn((res_y, res_x), |(i, _)| ys[i]);
        Self { x, y }
    }

    /// `(res_x, res_y)` this mesh was built for.
    pub fn resolution(&self) -> (usize, usize) {
        (self.x.ncols(), self.x.nrows())
    }

    pub fn matches(&self, res_x: usize, res_y: usize) -> bool {
        self.resolution() == (res_x, res_y)
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array2<f64> {
        &self.y
    }
}

/// `n` evenly spaced samples from `-⌊n/2⌋` to `⌊n/2⌋` inclusive.
fn centred_axis(n: usize) -> Vec<f64> {
    let half = (n / 2) as f64;
    if n < 2 {
        return vec![0.0; n];
    }
    let step = 2.0 * half / (n - 1) as f64;
    (0..n).map(|i| -half + step * i as f64).collect()
}
