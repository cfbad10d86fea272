//! Zernike polynomials in OSA/ANSI single-index order.
//!
//! The single index `j` maps to the radial degree `n` and azimuthal frequency
//! `m` by walking `(0,0), (1,-1), (1,1), (2,-2), (2,0), (2,2), …`: `m` advances
//! by 2 from `-n` to `n`, and `n` increments once `m` would exceed it.
//!
//! The orthonormal polynomial is
//!
//! $$
//! Z_n^m(\rho, \theta) = N_n^m R_n^{|m|}(\rho)
//! \begin{cases} \cos(m\theta) & m > 0 \\ 1 & m = 0 \\ \sin(|m|\theta) & m < 0 \end{cases}
//! $$
//!
//! with $N_n^m = \sqrt{n+1}$ for $m = 0$, $\sqrt{2n+2}$ otherwise, and
//!
//! $$
//! R_n^{|m|}(\rho) = \sum_{k=0}^{(n-|m|)/2} \frac{(-1)^k (n-k)!}
//! {k!\,\left(\frac{n+|m|}{2}-k\right)!\,\left(\frac{n-|m|}{2}-k\right)!}\,\rho^{n-2k}
//! $$

/// Largest `n` whose factorials fit the lookup table.
pub const MAX_RADIAL_DEGREE: u32 = 20;

const FACTORIALS: [u64; 21] = {
    let mut table = [1u64; 21];
    let mut i = 1;
    while i < 21 {
        table[i] = table[i - 1] * i as u64;
        i += 1;
    }
    table
};

/// `k!` for `k ≤ 20`, `None` above.
pub fn factorial(k: u32) -> Option<f64> {
    FACTORIALS.get(k as usize).map(|&f| f as f64)
}

/// Convert an ANSI single index to `(n, m)`.
pub fn ansi_to_nm(index: usize) -> (u32, i32) {
    let (mut n, mut m) = (0u32, 0i32);
    for _ in 0..index {
        m += 2;
        if m > n as i32 {
            n += 1;
            m = -(n as i32);
        }
    }
    (n, m)
}

/// Radial term coefficients `(c_k, power)` of $R_n^{|m|}$.
///
/// Returns `None` when `n` exceeds [`MAX_RADIAL_DEGREE`].
pub fn radial_terms(n: u32, m: i32) -> Option<Vec<(f64, i32)>> {
    if n > MAX_RADIAL_DEGREE {
        return None;
    }
    let m_abs = m.unsigned_abs();
    let half_sum = (n + m_abs) / 2;
    let half_diff = (n - m_abs) / 2;
    (0..=half_diff)
        .map(|k| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let c = sign * factorial(n - k)?
                / (factorial(k)? * factorial(half_sum - k)? * factorial(half_diff - k)?);
            Some((c, (n - 2 * k) as i32))
        })
        .collect()
}

/// Normalisation factor $N_n^m$.
pub fn normalisation(n: u32, m: i32) -> f64 {
    if m == 0 {
        (n as f64 + 1.0).sqrt()
    } else {
        (2.0 * n as f64 + 2.0).sqrt()
    }
}

/// A single Zernike mode prepared for repeated evaluation.
#[derive(Debug, Clone)]
pub struct ZernikeMode {
    pub n: u32,
    pub m: i32,
    scale: f64,
    terms: Vec<(f64, i32)>,
}

impl ZernikeMode {
    /// Prepare mode `(n, m)` scaled by `coefficient`; `None` if `n` is too
    /// large for the factorial table.
    pub fn new(n: u32, m: i32, coefficient: f64) -> Option<Self> {
        let terms = radial_terms(n, m)?;
        Some(Self {
            n,
            m,
            scale: coefficient * normalisation(n, m),
            terms,
        })
    }

    /// Evaluate at polar coordinates `(rho, theta)`.
    pub fn eval(&self, rho: f64, theta: f64) -> f64 {
        let radial: f64 = self.terms.iter().map(|&(c, p)| c * rho.powi(p)).sum();
        let angular = match self.m {
            0 => 1.0,
            m if m > 0 => (m as f64 * theta).cos(),
            m => ((-m) as f64 * theta).sin(),
        };
        self.scale * radial * angular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ansi_ordering() {
        let expected = [
            (0, 0),
            (1, -1),
            (1, 1),
            (2, -2),
            (2, 0),
            (2, 2),
            (3, -3),
            (3, -1),
            (3, 1),
            (3, 3),
            (4, -4),
        ];
        for (j, &nm) in expected.iter().enumerate() {
            assert_eq!(ansi_to_nm(j), nm, "index {}", j);
        }
    }

    #[test]
    fn test_defocus_radial_polynomial() {
        // R_2^0 = 2ρ² − 1
        let terms = radial_terms(2, 0).unwrap();
        assert_eq!(terms, vec![(2.0, 2), (-1.0, 0)]);
        // R_4^0 = 6ρ⁴ − 6ρ² + 1
        let terms = radial_terms(4, 0).unwrap();
        assert_eq!(terms, vec![(6.0, 4), (-6.0, 2), (1.0, 0)]);
    }

    #[test]
    fn test_mode_values() {
        let tilt_x = ZernikeMode::new(1, 1, 1.0).unwrap();
        assert_relative_eq!(tilt_x.eval(1.0, 0.0), 2.0);
        assert_relative_eq!(tilt_x.eval(0.5, std::f64::consts::PI), -1.0, epsilon = 1e-12);

        let defocus = ZernikeMode::new(2, 0, 1.0).unwrap();
        assert_relative_eq!(defocus.eval(0.0, 0.3), -(3.0f64).sqrt());
        assert_relative_eq!(defocus.eval(1.0, 1.2), (3.0f64).sqrt());
    }

    #[test]
    fn test_factorial_limit() {
        assert_eq!(factorial(20), Some(2_432_902_008_176_640_000.0));
        assert_eq!(factorial(21), None);
        assert!(radial_terms(21, 1).is_none());
        assert!(ZernikeMode::new(20, 0, 1.0).is_some());
    }
}
